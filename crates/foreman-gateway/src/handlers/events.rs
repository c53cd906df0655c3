//! Journal search and artifact listing.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::BearerToken;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

/// `GET /api/v1/sessions/{session_id}/events/search?q=`
pub async fn search_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<SearchParams>,
    _auth: BearerToken,
) -> ApiResult<Json<Value>> {
    let events = state
        .engine
        .search_events(&session_id, params.q.as_deref())
        .await?;
    Ok(Json(json!({ "items": events })))
}

/// `GET /api/v1/sessions/{session_id}/artifacts`
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    _auth: BearerToken,
) -> ApiResult<Json<Value>> {
    let artifacts = state.engine.list_artifacts(&session_id).await?;
    Ok(Json(json!({ "items": artifacts })))
}
