//! Persistent entities and the request/response shapes of the engine
//! operations.
//!
//! Entities serialize to the exact JSON the HTTP API exposes, so the
//! gateway returns them directly instead of re-mapping field by field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::status::WorkflowStatus;

fn short_hex(len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..len].to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Execution mode of a session. `dry_run` refuses workspace-mutating tools
/// at request time, before any run row is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Normal,
    DryRun,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Normal => "normal",
            SessionMode::DryRun => "dry_run",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(SessionMode::Normal),
            "dry_run" => Ok(SessionMode::DryRun),
            _ => Err(format!("unknown session mode: {s}")),
        }
    }
}

/// Safety profile of a session. `strict` enforces the preview-gate on
/// mutating tools; `dev` disables the gate (the tools still validate any
/// preview they are handed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyProfile {
    #[default]
    Strict,
    Dev,
}

impl SafetyProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyProfile::Strict => "strict",
            SafetyProfile::Dev => "dev",
        }
    }
}

impl fmt::Display for SafetyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(SafetyProfile::Strict),
            "dev" => Ok(SafetyProfile::Dev),
            _ => Err(format!("unknown safety profile: {s}")),
        }
    }
}

/// Conversation/goal envelope owning a workspace and a sequence of plan
/// versions.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub goal: Option<String>,
    pub mode: SessionMode,
    pub safety_profile: SafetyProfile,
    pub status: WorkflowStatus,
    pub plan_version: Option<i64>,
    pub needs_replan: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: Option<String>, mode: SessionMode, safety_profile: SafetyProfile) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", short_hex(12)),
            goal,
            mode,
            safety_profile,
            status: WorkflowStatus::Pending,
            plan_version: None,
            needs_replan: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan / Step
// ─────────────────────────────────────────────────────────────────────────────

/// Operator-facing risk grade of a step. `high` requires an explicit
/// `confirm_high_risk` on execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            _ => Err(format!("unknown risk level: {s}")),
        }
    }
}

/// An ordered, versioned script of steps within a session.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: i64,
    pub session_id: String,
    pub version: i64,
    pub title: String,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

pub const TIMEOUT_SEC_MIN: u64 = 1;
pub const TIMEOUT_SEC_MAX: u64 = 120;
pub const TIMEOUT_SEC_DEFAULT: u64 = 30;

/// Recognized keys of the step payload column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPayload {
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_timeout_sec() -> u64 {
    TIMEOUT_SEC_DEFAULT
}

impl Default for StepPayload {
    fn default() -> Self {
        Self {
            inputs: Map::new(),
            timeout_sec: TIMEOUT_SEC_DEFAULT,
        }
    }
}

/// A unit of planned work. `(plan, step_key)` is the external identity.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: i64,
    pub plan_id: i64,
    pub step_key: String,
    pub title: String,
    pub tool_name: String,
    pub status: WorkflowStatus,
    pub risk: RiskLevel,
    pub payload: StepPayload,
}

// ─────────────────────────────────────────────────────────────────────────────
// Run
// ─────────────────────────────────────────────────────────────────────────────

/// A single execution attempt of a step. Driven exclusively through
/// [`transition_run`](crate::status::transition_run); `id` is assigned by
/// storage on insertion.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Option<i64>,
    pub session_id: String,
    pub plan_id: i64,
    pub step_id: i64,
    pub tool_name: String,
    pub status: WorkflowStatus,
    pub needs_replan: bool,
    pub failure_reason: Option<String>,
    pub output: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        session_id: impl Into<String>,
        plan_id: i64,
        step_id: i64,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            session_id: session_id.into(),
            plan_id,
            step_id,
            tool_name: tool_name.into(),
            status: WorkflowStatus::Pending,
            needs_replan: false,
            failure_reason: None,
            output: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock duration, derived from the start/finish stamps.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Journal / artifacts / approvals / registry
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only journal record. Rows are never updated or deleted; the
/// storage layer enforces this with triggers.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub session_id: String,
    pub run_id: Option<i64>,
    pub event_type: String,
    pub summary: String,
    pub payload_text: String,
    pub source: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted output of a run. `path` is relative to the project root and
/// canonical.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub id: i64,
    pub session_id: String,
    pub run_id: i64,
    pub step_id: i64,
    pub kind: String,
    pub path: String,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Subject of an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSubject {
    Plan,
    Step,
}

impl ApprovalSubject {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalSubject::Plan => "plan",
            ApprovalSubject::Step => "step",
        }
    }
}

/// Immutable assertion that a plan or step is cleared to proceed.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub id: i64,
    pub session_id: String,
    pub subject_type: ApprovalSubject,
    pub plan_id: Option<i64>,
    pub step_id: Option<i64>,
    pub approved_by: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Registry row describing an invocable tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub tool_name: String,
    pub permission_profile: String,
    pub description: String,
    pub enabled: bool,
}

impl ToolDescriptor {
    /// Placeholder descriptor returned for names absent from the registry.
    pub fn unknown(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            permission_profile: "unknown".to_string(),
            description: String::new(),
            enabled: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine operation requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default)]
    pub safety_profile: SafetyProfile,
}

/// One step of a plan import. `timeout_sec` is clamped to
/// `[TIMEOUT_SEC_MIN, TIMEOUT_SEC_MAX]` during import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStepSpec {
    pub id: String,
    pub title: String,
    pub tool: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub risk: RiskLevel,
}

impl PlanStepSpec {
    pub fn clamped_timeout_sec(&self) -> u64 {
        self.timeout_sec
            .unwrap_or(TIMEOUT_SEC_DEFAULT)
            .clamp(TIMEOUT_SEC_MIN, TIMEOUT_SEC_MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanImportRequest {
    #[serde(default = "default_plan_version")]
    pub version: i64,
    #[serde(default = "default_plan_title")]
    pub title: String,
    #[serde(default)]
    pub session_goal: Option<String>,
    #[serde(default)]
    pub steps: Vec<PlanStepSpec>,
}

fn default_plan_version() -> i64 {
    1
}

fn default_plan_title() -> String {
    "Imported plan".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default = "default_approved_by")]
    pub approved_by: String,
    #[serde(default = "default_approval_source")]
    pub source: String,
}

fn default_approved_by() -> String {
    "system".to_string()
}

fn default_approval_source() -> String {
    "api".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ExecuteStepRequest {
    #[serde(default)]
    pub confirm_high_risk: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine operation responses
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub id: String,
    pub title: String,
    pub tool: String,
    pub status: WorkflowStatus,
    pub risk: RiskLevel,
    pub inputs: Map<String, Value>,
    pub timeout_sec: u64,
}

impl From<&Step> for StepView {
    fn from(step: &Step) -> Self {
        Self {
            id: step.step_key.clone(),
            title: step.title.clone(),
            tool: step.tool_name.clone(),
            status: step.status,
            risk: step.risk,
            inputs: step.payload.inputs.clone(),
            timeout_sec: step.payload.timeout_sec,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanView {
    pub session_id: String,
    pub version: i64,
    pub title: String,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactView {
    pub id: i64,
    pub kind: String,
    pub path: String,
    pub sha256: String,
}

impl From<&Artifact> for ArtifactView {
    fn from(artifact: &Artifact) -> Self {
        Self {
            id: artifact.id,
            kind: artifact.kind.clone(),
            path: artifact.path.clone(),
            sha256: artifact.sha256.clone(),
        }
    }
}

/// Outcome of `execute_step`. Tool failures land here with `status=failed`
/// and HTTP 200: they are recorded outcomes, not transport errors.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteStepResponse {
    pub session_id: String,
    pub step_id: String,
    pub status: WorkflowStatus,
    pub run_id: i64,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub artifacts: Vec<ArtifactView>,
}
