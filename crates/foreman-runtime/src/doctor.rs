//! `doctor`: hermetic self-test of the engine.
//!
//! Runs the whole protocol once against a disposable session: registry
//! read, session creation, plan import, both approvals, a readonly step
//! execution, event search, artifact listing, and session stop. A failing
//! check short-circuits the chain: later checks are reported as `skip`
//! with the blocking check named in the detail.

use serde::Serialize;
use serde_json::json;

use foreman_kernel::model::{
    ApprovalRequest, CreateSessionRequest, ExecuteStepRequest, PlanImportRequest, PlanStepSpec,
    RiskLevel, SafetyProfile, SessionMode,
};
use foreman_kernel::status::WorkflowStatus;

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub ok: bool,
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let ok = !checks.iter().any(|c| c.status == CheckStatus::Fail);
        Self { ok, checks }
    }
}

struct Probe {
    checks: Vec<DoctorCheck>,
    blocked_by: Option<&'static str>,
}

impl Probe {
    fn new() -> Self {
        Self {
            checks: Vec::new(),
            blocked_by: None,
        }
    }

    fn skip_if_blocked(&mut self, name: &'static str) -> bool {
        if let Some(blocker) = self.blocked_by {
            self.checks.push(DoctorCheck {
                name,
                status: CheckStatus::Skip,
                detail: format!("skipped: {blocker} failed"),
            });
            return true;
        }
        false
    }

    fn pass(&mut self, name: &'static str, detail: impl Into<String>) {
        self.checks.push(DoctorCheck {
            name,
            status: CheckStatus::Pass,
            detail: detail.into(),
        });
    }

    fn warn(&mut self, name: &'static str, detail: impl Into<String>) {
        self.checks.push(DoctorCheck {
            name,
            status: CheckStatus::Warn,
            detail: detail.into(),
        });
    }

    fn fail(&mut self, name: &'static str, detail: impl Into<String>) {
        self.checks.push(DoctorCheck {
            name,
            status: CheckStatus::Fail,
            detail: detail.into(),
        });
        self.blocked_by = Some(name);
    }
}

const DOCTOR_PLAN_VERSION: i64 = 1;
const DOCTOR_STEP_KEY: &str = "doctor_step";

fn doctor_plan() -> PlanImportRequest {
    PlanImportRequest {
        version: DOCTOR_PLAN_VERSION,
        title: "doctor probe plan".to_string(),
        session_goal: None,
        steps: vec![PlanStepSpec {
            id: DOCTOR_STEP_KEY.to_string(),
            title: "List workspace".to_string(),
            tool: "list_dir".to_string(),
            inputs: [("path".to_string(), json!("."))].into_iter().collect(),
            timeout_sec: Some(30),
            risk: RiskLevel::Low,
        }],
    }
}

fn approval() -> ApprovalRequest {
    ApprovalRequest {
        approved_by: "doctor".to_string(),
        source: "doctor".to_string(),
    }
}

pub async fn run_doctor(engine: &Engine) -> DoctorReport {
    let mut probe = Probe::new();

    // storage
    match engine.list_tools().await {
        Ok(tools) => probe.pass("storage", format!("{} tools registered", tools.len())),
        Err(error) => probe.fail("storage", error.to_string()),
    }

    // session_create
    let mut session_id = None;
    if !probe.skip_if_blocked("session_create") {
        let request = CreateSessionRequest {
            goal: Some("doctor probe".to_string()),
            mode: SessionMode::Normal,
            safety_profile: SafetyProfile::Strict,
        };
        match engine.create_session(request).await {
            Ok(session) => {
                probe.pass("session_create", session.id.clone());
                session_id = Some(session.id);
            }
            Err(error) => probe.fail("session_create", error.to_string()),
        }
    }
    let sid = session_id.unwrap_or_default();

    // plan_import
    if !probe.skip_if_blocked("plan_import") {
        match engine.import_plan(&sid, doctor_plan()).await {
            Ok(plan) => probe.pass(
                "plan_import",
                format!("plan v{} with {} step(s)", plan.version, plan.steps.len()),
            ),
            Err(error) => probe.fail("plan_import", error.to_string()),
        }
    }

    // plan_approve
    if !probe.skip_if_blocked("plan_approve") {
        match engine.approve_plan(&sid, DOCTOR_PLAN_VERSION, approval()).await {
            Ok(()) => probe.pass("plan_approve", format!("plan v{DOCTOR_PLAN_VERSION} approved")),
            Err(error) => probe.fail("plan_approve", error.to_string()),
        }
    }

    // step_approve
    if !probe.skip_if_blocked("step_approve") {
        match engine.approve_step(&sid, DOCTOR_STEP_KEY, approval()).await {
            Ok(()) => probe.pass("step_approve", format!("step {DOCTOR_STEP_KEY} approved")),
            Err(error) => probe.fail("step_approve", error.to_string()),
        }
    }

    // step_execute
    if !probe.skip_if_blocked("step_execute") {
        match engine
            .execute_step(&sid, DOCTOR_STEP_KEY, ExecuteStepRequest::default())
            .await
        {
            Ok(response) if response.status == WorkflowStatus::Succeeded => {
                probe.pass("step_execute", format!("run {} succeeded", response.run_id));
            }
            Ok(response) => probe.fail(
                "step_execute",
                response
                    .error
                    .unwrap_or_else(|| format!("run finished as {}", response.status)),
            ),
            Err(error) => probe.fail("step_execute", error.to_string()),
        }
    }

    // events_search
    if !probe.skip_if_blocked("events_search") {
        match engine.search_events(&sid, None).await {
            Ok(events) if events.is_empty() => {
                probe.warn("events_search", "no events recorded for probe session")
            }
            Ok(events) => probe.pass("events_search", format!("{} event(s)", events.len())),
            Err(error) => probe.fail("events_search", error.to_string()),
        }
    }

    // artifacts_list
    if !probe.skip_if_blocked("artifacts_list") {
        match engine.list_artifacts(&sid).await {
            Ok(artifacts) if artifacts.is_empty() => {
                probe.warn("artifacts_list", "no artifacts recorded for probe session")
            }
            Ok(artifacts) => probe.pass("artifacts_list", format!("{} artifact(s)", artifacts.len())),
            Err(error) => probe.fail("artifacts_list", error.to_string()),
        }
    }

    // session_stop is cleanup of the disposable session; a failure here
    // does not invalidate the probe itself.
    if !probe.skip_if_blocked("session_stop") {
        match engine.stop_session(&sid).await {
            Ok(()) => probe.pass("session_stop", "probe session cancelled"),
            Err(error) => probe.warn("session_stop", format!("cleanup failed: {error}")),
        }
    }

    DoctorReport::from_checks(probe.checks)
}
