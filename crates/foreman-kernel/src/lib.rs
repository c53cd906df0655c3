//! Foreman kernel: the dependency-light domain contract.
//!
//! This crate defines what the rest of the workspace agrees on: the
//! [`WorkflowStatus`](status::WorkflowStatus) state machine, the persistent
//! entities (sessions, plans, steps, runs, events, artifacts, approvals),
//! the request/response shapes of the engine operations, and the
//! [`EngineError`](error::EngineError) taxonomy that the gateway maps onto
//! HTTP status codes.
//!
//! Nothing in here touches a database, a socket, or the filesystem.

pub mod error;
pub mod model;
pub mod status;

pub use error::{EngineError, EngineResult, ProtocolViolation};
pub use model::{
    Approval, Artifact, Event, Plan, Run, RiskLevel, SafetyProfile, Session, SessionMode, Step,
    StepPayload, ToolDescriptor,
};
pub use status::{InvalidStateTransition, WorkflowStatus, transition_run};
