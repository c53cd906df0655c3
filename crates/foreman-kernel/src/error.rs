//! Engine error taxonomy.
//!
//! Every kind carries a machine-readable tag and a human-readable detail.
//! The gateway owns the mapping onto HTTP status codes; tool failures are
//! deliberately absent here; they are recorded run outcomes, not errors.

use thiserror::Error;

use crate::status::InvalidStateTransition;

/// Protocol violations a caller can recover from (mapped to 409).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    NeedsReplan,
    Unapproved,
    HighRiskUnconfirmed,
    DryRunRefusesMutation,
    ReferenceUnresolved,
}

impl ProtocolViolation {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolViolation::NeedsReplan => "needs_replan",
            ProtocolViolation::Unapproved => "unapproved",
            ProtocolViolation::HighRiskUnconfirmed => "high_risk_unconfirmed",
            ProtocolViolation::DryRunRefusesMutation => "dry_run_refuses_mutation",
            ProtocolViolation::ReferenceUnresolved => "reference_unresolved",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("authorization header with bearer token is required")]
    AuthMissing,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("{detail}")]
    Protocol {
        kind: ProtocolViolation,
        detail: String,
    },

    #[error(transparent)]
    Transition(#[from] InvalidStateTransition),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(kind: ProtocolViolation, detail: impl Into<String>) -> Self {
        EngineError::Protocol {
            kind,
            detail: detail.into(),
        }
    }

    /// Whether this kind indicates a server-side bug rather than a caller
    /// mistake.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EngineError::Transition(_) | EngineError::Storage(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
