//! Foreman runtime: the orchestration engine and its diagnostics.
//!
//! [`Engine`](engine::Engine) owns the protocol: sessions, plan import,
//! approvals, the step-execution pipeline, the session roll-up, and event
//! emission. [`doctor`](doctor) runs a hermetic end-to-end probe against
//! an engine on a disposable session.

pub mod doctor;
pub mod engine;

pub use doctor::{CheckStatus, DoctorCheck, DoctorReport, run_doctor};
pub use engine::Engine;
