//! Workflow status set and the run state machine.
//!
//! The transition table is data: [`WorkflowStatus::allowed_transitions`]
//! returns the legal successors and [`transition_run`] is a pure function
//! over a [`Run`]: it never touches storage and takes the clock as an
//! argument, so effects (persistence, journal emission) stay with the
//! caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::Run;

/// Lifecycle status shared by sessions, steps, and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    AwaitingPlanApproval,
    AwaitingStepApproval,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl WorkflowStatus {
    /// Legal successor statuses. Terminal statuses have none.
    pub fn allowed_transitions(self) -> &'static [WorkflowStatus] {
        use WorkflowStatus::*;
        match self {
            Pending => &[AwaitingPlanApproval, Cancelled],
            AwaitingPlanApproval => &[AwaitingStepApproval, Cancelled],
            AwaitingStepApproval => &[Running, Skipped, Cancelled],
            Running => &[Succeeded, Failed, Cancelled, Skipped],
            Succeeded | Failed | Cancelled | Skipped => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::AwaitingPlanApproval => "awaiting_plan_approval",
            WorkflowStatus::AwaitingStepApproval => "awaiting_step_approval",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStatus::Pending),
            "awaiting_plan_approval" => Ok(WorkflowStatus::AwaitingPlanApproval),
            "awaiting_step_approval" => Ok(WorkflowStatus::AwaitingStepApproval),
            "running" => Ok(WorkflowStatus::Running),
            "succeeded" => Ok(WorkflowStatus::Succeeded),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            "skipped" => Ok(WorkflowStatus::Skipped),
            _ => Err(format!("unknown workflow status: {s}")),
        }
    }
}

/// A transition not present in the table. Reaching this from a valid request
/// sequence is a bug, so the gateway maps it to a 500.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {from} -> {to}")]
pub struct InvalidStateTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

/// Advance a run to `next`.
///
/// - stamps `started_at` the first time the run enters `running`;
/// - stamps `finished_at` on any terminal status;
/// - on `failed`, records `failure_reason` (defaulting to `step_failed`)
///   and raises the run's `needs_replan` flag;
/// - on any other terminal status, clears `failure_reason`.
pub fn transition_run(
    mut run: Run,
    next: WorkflowStatus,
    failure_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Run, InvalidStateTransition> {
    if !run.status.can_transition_to(next) {
        return Err(InvalidStateTransition {
            from: run.status,
            to: next,
        });
    }
    run.status = next;
    run.needs_replan = next == WorkflowStatus::Failed;

    if run.status == WorkflowStatus::Running && run.started_at.is_none() {
        run.started_at = Some(now);
    }

    if run.status == WorkflowStatus::Failed {
        run.failure_reason = Some(failure_reason.unwrap_or("step_failed").to_string());
    } else if run.status.is_terminal() {
        run.failure_reason = None;
    }

    if run.status.is_terminal() {
        run.finished_at = Some(now);
    }

    Ok(run)
}
