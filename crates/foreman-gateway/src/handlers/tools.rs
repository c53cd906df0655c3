//! Tool registry read-through.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use foreman_kernel::model::ToolDescriptor;

use crate::auth::BearerToken;
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /api/v1/tools`
pub async fn list_tools(
    State(state): State<AppState>,
    _auth: BearerToken,
) -> ApiResult<Json<Value>> {
    let tools = state.engine.list_tools().await?;
    Ok(Json(json!({ "items": tools })))
}

/// `GET /api/v1/tools/{tool_name}/permissions`
///
/// Unknown names return a synthetic descriptor with
/// `permission_profile="unknown", enabled=false` rather than a 404.
pub async fn get_tool_permissions(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    _auth: BearerToken,
) -> ApiResult<Json<ToolDescriptor>> {
    Ok(Json(state.engine.get_tool_permissions(&tool_name).await?))
}
