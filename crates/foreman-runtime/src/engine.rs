//! The orchestration engine.
//!
//! Every public operation is atomic: it opens one transaction, performs
//! its writes and event emission, and commits, or rolls the whole request
//! back. Step execution is synchronous with the originating request; the
//! only suspension point is the executor's bounded worker.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use foreman_foundation::executor::{RunResult, StepExecutor};
use foreman_foundation::paths::DataPaths;
use foreman_foundation::resolver;
use foreman_foundation::storage::queries::{self, EventDraft, StepRecord};
use foreman_foundation::storage::{StorageError, Store};
use foreman_kernel::model::{
    ApprovalRequest, ApprovalSubject, Artifact, ArtifactView, CreateSessionRequest, Event,
    ExecuteStepRequest, ExecuteStepResponse, PlanImportRequest, PlanView, RiskLevel, Session,
    SessionMode, SafetyProfile, StepView, ToolDescriptor,
};
use foreman_kernel::status::WorkflowStatus;
use foreman_kernel::{EngineError, EngineResult, ProtocolViolation, transition_run};

/// Facade over storage, tools, and the on-disk layout. Cheap to clone is
/// not a goal; handlers share it behind an `Arc`.
pub struct Engine {
    store: Store,
    paths: DataPaths,
    executor: StepExecutor,
}

impl Engine {
    pub fn new(store: Store, paths: DataPaths) -> Self {
        Self {
            store,
            paths,
            executor: StepExecutor::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    fn io_error(context: &str, error: std::io::Error) -> EngineError {
        EngineError::Storage(format!("{context}: {error}"))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_session(&self, request: CreateSessionRequest) -> EngineResult<Session> {
        let session = Session::new(request.goal, request.mode, request.safety_profile);
        self.paths
            .ensure_session_dirs(&session.id)
            .map_err(|e| Self::io_error("failed to create session directories", e))?;

        let mut tx = self.store.begin().await?;
        queries::insert_session(&mut tx, &session).await?;
        queries::insert_event(
            &mut tx,
            EventDraft::new(&session.id, "session_created", "session created"),
        )
        .await?;
        self.store.commit(tx).await?;

        info!(session_id = %session.id, mode = %session.mode, profile = %session.safety_profile, "session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> EngineResult<Session> {
        let mut conn = self.store.acquire().await?;
        queries::fetch_session(&mut conn, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))
    }

    pub async fn stop_session(&self, session_id: &str) -> EngineResult<()> {
        let mut tx = self.store.begin().await?;
        queries::fetch_session(&mut tx, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;
        queries::update_session_status(&mut tx, session_id, WorkflowStatus::Cancelled, Utc::now())
            .await?;
        queries::insert_event(
            &mut tx,
            EventDraft::new(session_id, "session_stopped", "session stopped"),
        )
        .await?;
        self.store.commit(tx).await?;

        info!(session_id, "session stopped");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Plans and approvals
    // ─────────────────────────────────────────────────────────────────────

    pub async fn import_plan(
        &self,
        session_id: &str,
        request: PlanImportRequest,
    ) -> EngineResult<PlanView> {
        if request.version < 1 {
            return Err(EngineError::invalid_input("version", "must be >= 1"));
        }

        let raw_text = serde_json::to_string(&request)
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let mut tx = self.store.begin().await?;
        queries::fetch_session(&mut tx, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;

        let plan_id = queries::upsert_plan(
            &mut tx,
            session_id,
            request.version,
            &request.title,
            &raw_text,
            Utc::now(),
        )
        .await?;
        queries::replace_plan_steps(&mut tx, plan_id, &request.steps).await?;
        queries::update_session_for_import(
            &mut tx,
            session_id,
            request.session_goal.as_deref(),
            request.version,
            Utc::now(),
        )
        .await?;

        queries::insert_event(
            &mut tx,
            EventDraft::new(
                session_id,
                "plan_imported",
                format!("plan v{} imported", request.version),
            )
            .payload_text(request.title.clone()),
        )
        .await?;

        let steps = queries::fetch_plan_steps(&mut tx, plan_id).await?;
        self.store.commit(tx).await?;

        info!(session_id, version = request.version, steps = steps.len(), "plan imported");
        Ok(PlanView {
            session_id: session_id.to_string(),
            version: request.version,
            title: request.title,
            steps: steps.iter().map(StepView::from).collect(),
        })
    }

    pub async fn get_plan(&self, session_id: &str, version: i64) -> EngineResult<PlanView> {
        let mut conn = self.store.acquire().await?;
        queries::fetch_session(&mut conn, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;
        let plan = queries::fetch_plan(&mut conn, session_id, version)
            .await?
            .ok_or(EngineError::NotFound("plan"))?;
        let steps = queries::fetch_plan_steps(&mut conn, plan.id).await?;
        Ok(PlanView {
            session_id: session_id.to_string(),
            version: plan.version,
            title: plan.title,
            steps: steps.iter().map(StepView::from).collect(),
        })
    }

    pub async fn approve_plan(
        &self,
        session_id: &str,
        version: i64,
        request: ApprovalRequest,
    ) -> EngineResult<()> {
        let mut tx = self.store.begin().await?;
        queries::fetch_session(&mut tx, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;
        let plan = queries::fetch_plan(&mut tx, session_id, version)
            .await?
            .ok_or(EngineError::NotFound("plan"))?;

        queries::insert_approval(
            &mut tx,
            session_id,
            ApprovalSubject::Plan,
            Some(plan.id),
            None,
            &request.approved_by,
            &request.source,
            Utc::now(),
        )
        .await?;
        queries::update_session_status(
            &mut tx,
            session_id,
            WorkflowStatus::AwaitingStepApproval,
            Utc::now(),
        )
        .await?;
        queries::insert_event(
            &mut tx,
            EventDraft::new(session_id, "plan_approved", format!("plan v{version} approved"))
                .source(&request.source)
                .user_id(&request.approved_by),
        )
        .await?;
        self.store.commit(tx).await?;

        info!(session_id, version, approved_by = %request.approved_by, "plan approved");
        Ok(())
    }

    pub async fn approve_step(
        &self,
        session_id: &str,
        step_key: &str,
        request: ApprovalRequest,
    ) -> EngineResult<()> {
        let mut tx = self.store.begin().await?;
        queries::fetch_session(&mut tx, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;
        let record = queries::fetch_step(&mut tx, session_id, step_key)
            .await?
            .ok_or(EngineError::NotFound("step"))?;

        queries::insert_approval(
            &mut tx,
            session_id,
            ApprovalSubject::Step,
            Some(record.step.plan_id),
            Some(record.step.id),
            &request.approved_by,
            &request.source,
            Utc::now(),
        )
        .await?;
        queries::set_step_status(
            &mut tx,
            record.step.id,
            WorkflowStatus::AwaitingStepApproval,
        )
        .await?;
        queries::insert_event(
            &mut tx,
            EventDraft::new(session_id, "step_approved", format!("step {step_key} approved"))
                .source(&request.source)
                .user_id(&request.approved_by),
        )
        .await?;
        self.store.commit(tx).await?;

        info!(session_id, step_key, approved_by = %request.approved_by, "step approved");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Step execution
    // ─────────────────────────────────────────────────────────────────────

    pub async fn execute_step(
        &self,
        session_id: &str,
        step_key: &str,
        request: ExecuteStepRequest,
    ) -> EngineResult<ExecuteStepResponse> {
        let mut tx = self.store.begin().await?;

        // 1. Replan gate.
        let session = queries::fetch_session(&mut tx, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;
        if session.needs_replan {
            return Err(EngineError::protocol(
                ProtocolViolation::NeedsReplan,
                "session needs replan: import a new plan version before executing steps",
            ));
        }

        // 2. Approval gate: both the plan and the step must be cleared.
        let StepRecord { step, .. } = queries::fetch_step(&mut tx, session_id, step_key)
            .await?
            .ok_or(EngineError::NotFound("step"))?;
        let plan_approved = queries::has_plan_approval(&mut tx, session_id, step.plan_id).await?;
        let step_approved = queries::has_step_approval(&mut tx, session_id, step.id).await?;
        if !plan_approved || !step_approved {
            return Err(EngineError::protocol(
                ProtocolViolation::Unapproved,
                "plan and step approvals are required before execution",
            ));
        }

        // 3. High-risk steps need an explicit confirmation.
        if step.risk == RiskLevel::High && !request.confirm_high_risk {
            return Err(EngineError::protocol(
                ProtocolViolation::HighRiskUnconfirmed,
                format!("step {step_key} risk is high: confirm_high_risk=true required"),
            ));
        }

        // 4. dry_run sessions refuse mutating tools before a run exists.
        if session.mode == SessionMode::DryRun && is_mutating_invocation(&step.tool_name, &step.payload.inputs)
        {
            return Err(EngineError::protocol(
                ProtocolViolation::DryRunRefusesMutation,
                format!("dry_run mode refuses mutating tool {}", step.tool_name),
            ));
        }

        // 5. Resolve `${steps...}` references against prior outputs.
        let resolved = self
            .resolve_inputs(&mut tx, session_id, &step.payload.inputs)
            .await?;

        // 6. Preview-gate policy (strict profile only). A rejection is a
        //    recorded failed run, not an HTTP error.
        let gate_rejection = match session.safety_profile {
            SafetyProfile::Strict => preview_gate_rejection(&step.tool_name, &resolved),
            SafetyProfile::Dev => None,
        };

        // 7. Drive the run through the state machine.
        let mut run = foreman_kernel::model::Run::new(
            session_id.to_string(),
            step.plan_id,
            step.id,
            step.tool_name.clone(),
        );
        run = transition_run(run, WorkflowStatus::AwaitingPlanApproval, None, Utc::now())?;
        run = transition_run(run, WorkflowStatus::AwaitingStepApproval, None, Utc::now())?;
        run = transition_run(run, WorkflowStatus::Running, None, Utc::now())?;

        // 8. Invoke the tool (unless the gate already refused).
        let result = match gate_rejection {
            Some(reason) => {
                warn!(session_id, step_key, %reason, "preview gate rejected execution");
                RunResult::failed(reason)
            }
            None => {
                let workspace = self.paths.session_workspace(session_id);
                self.paths
                    .ensure_session_dirs(session_id)
                    .map_err(|e| Self::io_error("failed to create session directories", e))?;
                self.executor
                    .execute(&step.tool_name, resolved, step.payload.timeout_sec, &workspace)
                    .await
            }
        };

        // 9. Terminal transition and persistence.
        run.output = result.output.clone();
        let terminal = if result.is_failed() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Succeeded
        };
        run = transition_run(run, terminal, result.error.as_deref(), Utc::now())?;
        let run_id = queries::insert_run(&mut tx, &run).await?;

        let artifacts = self
            .persist_artifacts(&mut tx, session_id, run_id, step.id, &result)
            .await?;

        // 10. Step status and session roll-up.
        queries::set_step_status(&mut tx, step.id, terminal).await?;
        let (session_status, needs_replan) = if terminal == WorkflowStatus::Failed {
            (WorkflowStatus::Failed, true)
        } else if queries::count_steps_not_succeeded(&mut tx, step.plan_id).await? == 0 {
            (WorkflowStatus::Succeeded, false)
        } else {
            (WorkflowStatus::AwaitingStepApproval, false)
        };
        queries::update_session_rollup(&mut tx, session_id, session_status, needs_replan, Utc::now())
            .await?;

        // 11. Journal.
        let artifact_views: Vec<ArtifactView> = artifacts.iter().map(ArtifactView::from).collect();
        let (event_type, summary) = if terminal == WorkflowStatus::Failed {
            ("step_failed", format!("step {step_key} failed"))
        } else {
            ("step_executed", format!("step {step_key} executed"))
        };
        let event_payload = json!({
            "tool": step.tool_name,
            "runtime_status": terminal,
            "output": run.output,
            "error": run.failure_reason,
            "artifacts": artifact_views,
        });
        queries::insert_event(
            &mut tx,
            EventDraft::new(session_id, event_type, summary)
                .run_id(run_id)
                .payload_text(event_payload.to_string()),
        )
        .await?;
        for view in &artifact_views {
            queries::insert_event(
                &mut tx,
                EventDraft::new(
                    session_id,
                    "artifact_saved",
                    format!("artifact {} saved", view.path),
                )
                .run_id(run_id)
                .payload_text(view.path.clone()),
            )
            .await?;
        }

        self.store.commit(tx).await?;

        info!(session_id, step_key, run_id, status = %terminal, "step executed");
        Ok(ExecuteStepResponse {
            session_id: session_id.to_string(),
            step_id: step_key.to_string(),
            status: terminal,
            run_id,
            output: run.output,
            error: run.failure_reason,
            artifacts: artifact_views,
        })
    }

    async fn resolve_inputs(
        &self,
        tx: &mut sqlx::SqliteConnection,
        session_id: &str,
        inputs: &Map<String, Value>,
    ) -> EngineResult<Map<String, Value>> {
        let inputs_value = Value::Object(inputs.clone());
        let mut references = Vec::new();
        resolver::collect_references(&inputs_value, &mut references);

        let mut outputs: HashMap<String, Value> = HashMap::new();
        for reference in &references {
            if outputs.contains_key(&reference.step_key) {
                continue;
            }
            match queries::latest_succeeded_output(tx, session_id, &reference.step_key).await? {
                Some(output) => {
                    outputs.insert(reference.step_key.clone(), output);
                }
                None => {
                    return Err(EngineError::protocol(
                        ProtocolViolation::ReferenceUnresolved,
                        format!(
                            "step input reference could not be resolved: {}",
                            reference.original
                        ),
                    ));
                }
            }
        }

        let resolved = resolver::substitute(&inputs_value, &outputs).map_err(|e| {
            EngineError::protocol(ProtocolViolation::ReferenceUnresolved, e.to_string())
        })?;
        match resolved {
            Value::Object(map) => Ok(map),
            _ => Ok(inputs.clone()),
        }
    }

    async fn persist_artifacts(
        &self,
        tx: &mut sqlx::SqliteConnection,
        session_id: &str,
        run_id: i64,
        step_id: i64,
        result: &RunResult,
    ) -> EngineResult<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(result.artifacts.len());
        for (index, runtime_artifact) in result.artifacts.iter().enumerate() {
            let file = self
                .paths
                .artifact_file(session_id, run_id, index, &runtime_artifact.name);
            let content = serde_json::to_string_pretty(&runtime_artifact.payload)
                .map_err(|e| EngineError::Storage(e.to_string()))?;
            std::fs::write(&file, &content)
                .map_err(|e| Self::io_error("failed to write artifact", e))?;

            let path = self.paths.relative_to_project(&file);
            let sha256 = foreman_foundation::tools::write_ops::sha256_hex(&content);
            let now = Utc::now();
            let artifact_id = queries::insert_artifact(
                tx,
                session_id,
                run_id,
                step_id,
                &runtime_artifact.kind,
                &path,
                &sha256,
                now,
            )
            .await?;
            artifacts.push(Artifact {
                id: artifact_id,
                session_id: session_id.to_string(),
                run_id,
                step_id,
                kind: runtime_artifact.kind.clone(),
                path,
                sha256,
                created_at: now,
            });
        }
        Ok(artifacts)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read paths
    // ─────────────────────────────────────────────────────────────────────

    /// FTS search with a LIKE fallback; without a query, the latest 100
    /// events newest-first.
    pub async fn search_events(
        &self,
        session_id: &str,
        query: Option<&str>,
    ) -> EngineResult<Vec<Event>> {
        let mut conn = self.store.acquire().await?;
        queries::fetch_session(&mut conn, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;

        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let Some(query) = query else {
            return Ok(queries::list_recent_events(&mut conn, session_id).await?);
        };

        match queries::search_events_fts(&mut conn, session_id, query).await {
            Ok(events) => Ok(events),
            Err(StorageError::Query(error)) => {
                warn!(session_id, %error, "event full-text search failed, falling back to LIKE scan");
                Ok(queries::search_events_like(&mut conn, session_id, query).await?)
            }
            Err(other) => Err(other.into()),
        }
    }

    pub async fn list_artifacts(&self, session_id: &str) -> EngineResult<Vec<Artifact>> {
        let mut conn = self.store.acquire().await?;
        queries::fetch_session(&mut conn, session_id)
            .await?
            .ok_or(EngineError::NotFound("session"))?;
        Ok(queries::list_artifacts(&mut conn, session_id).await?)
    }

    pub async fn list_tools(&self) -> EngineResult<Vec<ToolDescriptor>> {
        let mut conn = self.store.acquire().await?;
        queries::ensure_default_tools(&mut conn).await?;
        Ok(queries::list_tools(&mut conn).await?)
    }

    /// Unknown names yield a synthetic disabled descriptor instead of 404.
    pub async fn get_tool_permissions(&self, tool_name: &str) -> EngineResult<ToolDescriptor> {
        let mut conn = self.store.acquire().await?;
        Ok(queries::fetch_tool(&mut conn, tool_name)
            .await?
            .unwrap_or_else(|| ToolDescriptor::unknown(tool_name)))
    }
}

/// Whether this invocation would mutate the workspace. `apply_patch` only
/// mutates in apply mode.
fn is_mutating_invocation(tool_name: &str, inputs: &Map<String, Value>) -> bool {
    match tool_name {
        "write_file_apply" => true,
        "apply_patch" => inputs.get("mode").and_then(Value::as_str) == Some("apply"),
        _ => false,
    }
}

/// The preview-gate: in strict sessions, applying without a preview input
/// is refused before the handler runs.
fn preview_gate_rejection(tool_name: &str, inputs: &Map<String, Value>) -> Option<String> {
    let missing_preview = !inputs.contains_key("preview");
    match tool_name {
        "write_file_apply" if missing_preview => Some(
            "preview gate rejected: preview is required for write_file_apply".to_string(),
        ),
        "apply_patch"
            if missing_preview && inputs.get("mode").and_then(Value::as_str) == Some("apply") =>
        {
            Some("preview gate rejected: preview is required for apply_patch".to_string())
        }
        _ => None,
    }
}
