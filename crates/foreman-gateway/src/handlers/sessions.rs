//! Session lifecycle endpoints.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use foreman_kernel::model::{CreateSessionRequest, Session};
use foreman_kernel::status::WorkflowStatus;

use crate::auth::BearerToken;
use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::state::AppState;

/// `POST /api/v1/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    _auth: BearerToken,
    ApiJson(request): ApiJson<CreateSessionRequest>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.engine.create_session(request).await?))
}

/// `GET /api/v1/sessions/{session_id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    _auth: BearerToken,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.engine.get_session(&session_id).await?))
}

/// `POST /api/v1/sessions/{session_id}/stop`, an idempotent cancel.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    _auth: BearerToken,
) -> ApiResult<Json<Value>> {
    state.engine.stop_session(&session_id).await?;
    Ok(Json(json!({
        "session_id": session_id,
        "status": WorkflowStatus::Cancelled,
    })))
}
