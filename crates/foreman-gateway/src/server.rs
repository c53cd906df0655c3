//! Router assembly and the serving loop.

use axum::Json;
use axum::Router;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::json;
use tracing::info;

use crate::handlers;
use crate::state::AppState;

/// Build the full API router against the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sessions", post(handlers::sessions::create_session))
        .route(
            "/api/v1/sessions/{session_id}",
            get(handlers::sessions::get_session),
        )
        .route(
            "/api/v1/sessions/{session_id}/stop",
            post(handlers::sessions::stop_session),
        )
        .route(
            "/api/v1/sessions/{session_id}/plans/import",
            post(handlers::plans::import_plan),
        )
        .route(
            "/api/v1/sessions/{session_id}/plans/{version}",
            get(handlers::plans::get_plan),
        )
        .route(
            "/api/v1/sessions/{session_id}/plans/{version}/approve",
            post(handlers::plans::approve_plan),
        )
        .route(
            "/api/v1/sessions/{session_id}/steps/{step_id}/approve",
            post(handlers::steps::approve_step),
        )
        .route(
            "/api/v1/sessions/{session_id}/steps/{step_id}/execute",
            post(handlers::steps::execute_step),
        )
        .route(
            "/api/v1/sessions/{session_id}/events/search",
            get(handlers::events::search_events),
        )
        .route(
            "/api/v1/sessions/{session_id}/artifacts",
            get(handlers::events::list_artifacts),
        )
        .route("/api/v1/tools", get(handlers::tools::list_tools))
        .route(
            "/api/v1/tools/{tool_name}/permissions",
            get(handlers::tools::get_tool_permissions),
        )
        .with_state(state)
}

/// `GET /health`: liveness probe, unauthenticated.
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "foreman-gateway" }))
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    info!(addr = %addr, "foreman daemon listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
