//! Step executor: bounded tool invocation.
//!
//! Handlers are synchronous, so each invocation runs on a blocking worker
//! wrapped in a wall-clock timeout. A worker that misses its budget is
//! abandoned (best effort; the spawned thread cannot be interrupted) and
//! the run fails with an explicit timeout error. Handler errors of any
//! kind become a `failed` result, never a panic or an HTTP error.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::tools;

/// Terminal outcome of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    Succeeded,
    Failed,
}

impl ExecOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecOutcome::Succeeded => "succeeded",
            ExecOutcome::Failed => "failed",
        }
    }
}

/// An output the executor wants persisted alongside the run.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeArtifact {
    pub name: String,
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: ExecOutcome,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub artifacts: Vec<RuntimeArtifact>,
}

impl RunResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecOutcome::Failed,
            output: None,
            error: Some(error.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExecOutcome::Failed
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Invoke `tool` with `inputs`, bounded by `timeout_sec` (clamped to at
    /// least one second). The session's `workspace_root` is injected into
    /// the inputs unless the step already carries one.
    pub async fn execute(
        &self,
        tool: &str,
        mut inputs: Map<String, Value>,
        timeout_sec: u64,
        workspace_root: &Path,
    ) -> RunResult {
        let bounded_timeout = timeout_sec.max(1);
        inputs
            .entry("workspace_root".to_string())
            .or_insert_with(|| Value::from(workspace_root.display().to_string()));

        let tool_name = tool.to_string();
        let worker =
            tokio::task::spawn_blocking(move || tools::dispatch(&tool_name, inputs, bounded_timeout));

        let output = match tokio::time::timeout(Duration::from_secs(bounded_timeout), worker).await
        {
            Err(_) => return RunResult::failed(format!("tool timeout after {bounded_timeout}s")),
            Ok(Err(join_error)) => return RunResult::failed(join_error.to_string()),
            Ok(Ok(Err(tool_error))) => return RunResult::failed(tool_error.to_string()),
            Ok(Ok(Ok(output))) => output,
        };

        let artifact = RuntimeArtifact {
            name: format!("{tool}_{}.json", &Uuid::new_v4().simple().to_string()[..8]),
            kind: "json".to_string(),
            payload: output.clone(),
        };
        RunResult {
            status: ExecOutcome::Succeeded,
            output: Some(output),
            error: None,
            artifacts: vec![artifact],
        }
    }
}
