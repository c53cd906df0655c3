//! Step approval and execution.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use foreman_kernel::EngineError;
use foreman_kernel::model::{ApprovalRequest, ExecuteStepRequest, ExecuteStepResponse};

use crate::auth::BearerToken;
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::AppState;

/// `POST /api/v1/sessions/{session_id}/steps/{step_id}/approve`
pub async fn approve_step(
    State(state): State<AppState>,
    Path((session_id, step_id)): Path<(String, String)>,
    _auth: BearerToken,
    ApiJson(request): ApiJson<ApprovalRequest>,
) -> ApiResult<Json<Value>> {
    state.engine.approve_step(&session_id, &step_id, request).await?;
    Ok(Json(json!({
        "session_id": session_id,
        "step_id": step_id,
        "approved": true,
    })))
}

/// `POST /api/v1/sessions/{session_id}/steps/{step_id}/execute`
///
/// The body is optional: absent means no high-risk confirmation. Tool
/// failures come back as 200 with `status=failed`; only protocol
/// violations surface as 4xx.
pub async fn execute_step(
    State(state): State<AppState>,
    Path((session_id, step_id)): Path<(String, String)>,
    _auth: BearerToken,
    body: Bytes,
) -> ApiResult<Json<ExecuteStepResponse>> {
    let request: ExecuteStepRequest = if body.is_empty() {
        ExecuteStepRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError(EngineError::invalid_input("body", e.to_string())))?
    };

    Ok(Json(
        state.engine.execute_step(&session_id, &step_id, request).await?,
    ))
}
