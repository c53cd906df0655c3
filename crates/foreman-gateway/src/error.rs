//! Engine error → HTTP status mapping.
//!
//! Error bodies are always `{"detail": "<human readable>"}`. Tool failures
//! never reach this type: they are recorded run outcomes returned in a
//! 200 body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use foreman_kernel::EngineError;

/// Newtype so the foreign [`EngineError`] can implement [`IntoResponse`].
#[derive(Debug)]
pub struct ApiError(pub EngineError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::AuthMissing => StatusCode::UNAUTHORIZED,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidInput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Protocol { .. } => StatusCode::CONFLICT,
            EngineError::Transition(_) | EngineError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "internal engine error");
        }

        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}
