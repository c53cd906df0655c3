//! Plan import, retrieval, and approval.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use foreman_kernel::model::{ApprovalRequest, PlanImportRequest, PlanView};

use crate::auth::BearerToken;
use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::state::AppState;

/// `POST /api/v1/sessions/{session_id}/plans/import`
pub async fn import_plan(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    _auth: BearerToken,
    ApiJson(request): ApiJson<PlanImportRequest>,
) -> ApiResult<Json<PlanView>> {
    Ok(Json(state.engine.import_plan(&session_id, request).await?))
}

/// `GET /api/v1/sessions/{session_id}/plans/{version}`
pub async fn get_plan(
    State(state): State<AppState>,
    Path((session_id, version)): Path<(String, i64)>,
    _auth: BearerToken,
) -> ApiResult<Json<PlanView>> {
    Ok(Json(state.engine.get_plan(&session_id, version).await?))
}

/// `POST /api/v1/sessions/{session_id}/plans/{version}/approve`
pub async fn approve_plan(
    State(state): State<AppState>,
    Path((session_id, version)): Path<(String, i64)>,
    _auth: BearerToken,
    ApiJson(request): ApiJson<ApprovalRequest>,
) -> ApiResult<Json<Value>> {
    state.engine.approve_plan(&session_id, version, request).await?;
    Ok(Json(json!({
        "session_id": session_id,
        "version": version,
        "approved": true,
    })))
}
