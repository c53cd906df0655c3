//! In-process test harness for the Foreman daemon.
//!
//! Builds the full axum router over a temporary database and data root,
//! then drives it request by request via `tower::ServiceExt::oneshot`;
//! no sockets involved. A separate sqlx pool over the same database file
//! backs direct assertions (run rows, journal immutability, dropping the
//! FTS table).

use std::path::PathBuf;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower::ServiceExt;

use foreman_foundation::paths::DataPaths;
use foreman_foundation::storage::Store;
use foreman_gateway::{AppState, build_router};
use foreman_runtime::Engine;

pub const AUTH_HEADER: &str = "Bearer test-token";

/// A daemon instance over throwaway storage.
pub struct TestDaemon {
    pub app: Router,
    pub db_path: PathBuf,
    pub project_root: PathBuf,
    // owns the directory for the lifetime of the test
    _dir: tempfile::TempDir,
}

impl TestDaemon {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("foreman.sqlite3");
        let store = Store::open(&db_path).await.expect("open store");
        store.bootstrap().await.expect("bootstrap store");

        let paths = DataPaths::from_db_path(&db_path, None);
        let engine = Engine::new(store, paths);
        let app = build_router(AppState::new(engine));

        Self {
            app,
            db_path,
            project_root: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    pub fn workspace_root(&self, session_id: &str) -> PathBuf {
        self.project_root
            .join("data")
            .join("sessions")
            .join(session_id)
            .join("workspace")
    }

    /// Second connection pool over the same database file, for direct
    /// assertions outside the daemon.
    pub async fn raw_db(&self) -> sqlx::SqlitePool {
        let options = SqliteConnectOptions::new().filename(&self.db_path);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("open raw db")
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, payload)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::get(path)
            .header(header::AUTHORIZATION, AUTH_HEADER)
            .body(Body::empty())
            .expect("build request");
        self.send(request).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(path)
            .header(header::AUTHORIZATION, AUTH_HEADER)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request");
        self.send(request).await
    }

    pub async fn post_empty(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::post(path)
            .header(header::AUTHORIZATION, AUTH_HEADER)
            .body(Body::empty())
            .expect("build request");
        self.send(request).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Protocol helpers
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_session(&self, body: Value) -> String {
        let (status, payload) = self.post("/api/v1/sessions", body).await;
        assert_eq!(status, StatusCode::OK, "create session failed: {payload}");
        payload["id"].as_str().expect("session id").to_string()
    }

    pub async fn import_plan(&self, session_id: &str, payload: Value) {
        let (status, body) = self
            .post(&format!("/api/v1/sessions/{session_id}/plans/import"), payload)
            .await;
        assert_eq!(status, StatusCode::OK, "import plan failed: {body}");
    }

    pub async fn approve_plan(&self, session_id: &str, version: i64) {
        let (status, body) = self
            .post(
                &format!("/api/v1/sessions/{session_id}/plans/{version}/approve"),
                json!({"approved_by": "test-user", "source": "testing"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "approve plan failed: {body}");
        assert_eq!(body["approved"], json!(true));
    }

    pub async fn approve_step(&self, session_id: &str, step_id: &str) {
        let (status, body) = self
            .post(
                &format!("/api/v1/sessions/{session_id}/steps/{step_id}/approve"),
                json!({"approved_by": "test-user", "source": "testing"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "approve step failed: {body}");
        assert_eq!(body["approved"], json!(true));
    }

    pub async fn execute_step(&self, session_id: &str, step_id: &str) -> (StatusCode, Value) {
        self.post_empty(&format!(
            "/api/v1/sessions/{session_id}/steps/{step_id}/execute"
        ))
        .await
    }

    pub async fn session(&self, session_id: &str) -> Value {
        let (status, payload) = self.get(&format!("/api/v1/sessions/{session_id}")).await;
        assert_eq!(status, StatusCode::OK, "get session failed: {payload}");
        payload
    }

    pub async fn search_events(&self, session_id: &str, query: Option<&str>) -> Vec<Value> {
        let path = match query {
            Some(q) => format!("/api/v1/sessions/{session_id}/events/search?q={q}"),
            None => format!("/api/v1/sessions/{session_id}/events/search"),
        };
        let (status, payload) = self.get(&path).await;
        assert_eq!(status, StatusCode::OK, "search events failed: {payload}");
        payload["items"].as_array().expect("items").clone()
    }

    pub async fn list_artifacts(&self, session_id: &str) -> Vec<Value> {
        let (status, payload) = self
            .get(&format!("/api/v1/sessions/{session_id}/artifacts"))
            .await;
        assert_eq!(status, StatusCode::OK, "list artifacts failed: {payload}");
        payload["items"].as_array().expect("items").clone()
    }
}

/// A one-step `list_dir` plan, the smallest plan the daemon accepts.
pub fn list_dir_plan(version: i64, step_id: &str) -> Value {
    json!({
        "version": version,
        "title": "integration plan",
        "session_goal": "verify daemon api",
        "steps": [
            {
                "id": step_id,
                "title": "List files",
                "tool": "list_dir",
                "inputs": {"path": "."},
                "timeout_sec": 30,
            }
        ],
    })
}
