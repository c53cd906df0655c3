//! API behaviors: modes, approvals, high-risk confirmation, dry_run,
//! journal search fallback, registry reads, and journal immutability.

use axum::http::StatusCode;
use serde_json::json;

use foreman_testing::{TestDaemon, list_dir_plan};

#[tokio::test]
async fn create_session_round_trips_mode_and_profile() {
    let daemon = TestDaemon::start().await;
    let (status, payload) = daemon
        .post(
            "/api/v1/sessions",
            json!({"goal": "api test", "mode": "dry_run", "safety_profile": "dev"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["mode"], json!("dry_run"));
    assert_eq!(payload["safety_profile"], json!("dev"));
    assert_eq!(payload["status"], json!("pending"));
    assert_eq!(payload["needs_replan"], json!(false));

    let session = daemon.session(payload["id"].as_str().unwrap()).await;
    assert_eq!(session["mode"], json!("dry_run"));
    assert_eq!(session["safety_profile"], json!("dev"));
}

#[tokio::test]
async fn unknown_session_is_404() {
    let daemon = TestDaemon::start().await;
    let (status, payload) = daemon.get("/api/v1/sessions/session_missing0000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["detail"], json!("session not found"));
}

#[tokio::test]
async fn execute_rejects_before_approvals() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    daemon.import_plan(&session_id, list_dir_plan(1, "step_001")).await;

    let (status, payload) = daemon.execute_step(&session_id, "step_001").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(
        payload["detail"]
            .as_str()
            .unwrap()
            .contains("required before execution")
    );
}

#[tokio::test]
async fn execute_succeeds_after_both_approvals() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    daemon.import_plan(&session_id, list_dir_plan(1, "step_001")).await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_001").await;

    let (status, payload) = daemon.execute_step(&session_id, "step_001").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));
    assert!(payload["artifacts"].is_array());
    assert_eq!(payload["error"], serde_json::Value::Null);

    let session = daemon.session(&session_id).await;
    assert_eq!(session["status"], json!("succeeded"));
}

#[tokio::test]
async fn high_risk_requires_explicit_confirmation() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "high risk plan",
                "session_goal": "verify high risk confirm",
                "steps": [
                    {
                        "id": "step_high",
                        "title": "high risk execute",
                        "tool": "list_dir",
                        "risk": "high",
                        "inputs": {"path": "."},
                        "timeout_sec": 30,
                    }
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_high").await;

    let (status, payload) = daemon.execute_step(&session_id, "step_high").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(
        payload["detail"]
            .as_str()
            .unwrap()
            .contains("confirm_high_risk=true")
    );

    let (status, payload) = daemon
        .post(
            &format!("/api/v1/sessions/{session_id}/steps/step_high/execute"),
            json!({"confirm_high_risk": true}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));
}

#[tokio::test]
async fn dry_run_refuses_mutating_tools_before_any_run_exists() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon
        .create_session(json!({"goal": "dry run", "mode": "dry_run", "safety_profile": "dev"}))
        .await;

    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "dry run plan",
                "steps": [
                    {
                        "id": "step_preview",
                        "title": "preview write",
                        "tool": "write_file_preview",
                        "inputs": {"path": "memo.txt", "content": "after\n"},
                        "timeout_sec": 30,
                    },
                    {
                        "id": "step_apply",
                        "title": "apply write",
                        "tool": "write_file_apply",
                        "inputs": {"path": "memo.txt", "content": "after\n"},
                        "timeout_sec": 30,
                    },
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_preview").await;
    daemon.approve_step(&session_id, "step_apply").await;

    // readonly preview is fine in dry_run
    let (status, payload) = daemon.execute_step(&session_id, "step_preview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));

    let (status, payload) = daemon.execute_step(&session_id, "step_apply").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(payload["detail"].as_str().unwrap().contains("dry_run"));
    assert!(!daemon.workspace_root(&session_id).join("memo.txt").exists());

    // the refusal happened before a run row was created
    let pool = daemon.raw_db().await;
    let (runs,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM runs WHERE session_id = ? AND tool_name = 'write_file_apply'")
            .bind(&session_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(runs, 0);
}

#[tokio::test]
async fn execute_records_events_and_artifacts() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    daemon.import_plan(&session_id, list_dir_plan(1, "step_001")).await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_001").await;

    let (status, _) = daemon.execute_step(&session_id, "step_001").await;
    assert_eq!(status, StatusCode::OK);

    let events = daemon.search_events(&session_id, Some("executed")).await;
    assert!(events.iter().any(|e| e["event_type"] == json!("step_executed")));

    let events = daemon.search_events(&session_id, None).await;
    assert!(events.iter().any(|e| e["event_type"] == json!("artifact_saved")));

    let artifacts = daemon.list_artifacts(&session_id).await;
    assert_eq!(artifacts.len(), 1);
    let path = artifacts[0]["path"].as_str().unwrap();
    assert!(path.starts_with(&format!("data/sessions/{session_id}/artifacts/")));
    assert!(artifacts[0]["sha256"].as_str().unwrap().len() == 64);
}

#[tokio::test]
async fn event_search_falls_back_to_like_when_fts_is_missing() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    daemon.import_plan(&session_id, list_dir_plan(1, "step_001")).await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_001").await;
    let (status, _) = daemon.execute_step(&session_id, "step_001").await;
    assert_eq!(status, StatusCode::OK);

    let pool = daemon.raw_db().await;
    sqlx::raw_sql("DROP TABLE events_fts").execute(&pool).await.unwrap();

    // LIKE fallback also scans event_type, which FTS does not index.
    let events = daemon.search_events(&session_id, Some("step_executed")).await;
    assert!(events.iter().any(|e| e["event_type"] == json!("step_executed")));
}

#[tokio::test]
async fn stop_session_sets_cancelled_and_is_idempotent() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;

    let (status, payload) = daemon
        .post_empty(&format!("/api/v1/sessions/{session_id}/stop"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("cancelled"));

    let session = daemon.session(&session_id).await;
    assert_eq!(session["status"], json!("cancelled"));

    let (status, payload) = daemon
        .post_empty(&format!("/api/v1/sessions/{session_id}/stop"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("cancelled"));
}

#[tokio::test]
async fn tools_endpoints_expose_the_default_registry() {
    let daemon = TestDaemon::start().await;

    let (status, payload) = daemon.get("/api/v1/tools").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = payload["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["tool_name"].as_str().unwrap())
        .collect();
    for expected in [
        "apply_patch",
        "list_dir",
        "read_file",
        "run_shell_readonly",
        "write_file_apply",
        "write_file_preview",
    ] {
        assert!(names.contains(&expected), "missing tool {expected}");
    }

    let (status, payload) = daemon.get("/api/v1/tools/read_file/permissions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["tool_name"], json!("read_file"));
    assert_eq!(payload["permission_profile"], json!("workspace_read"));
    assert_eq!(payload["enabled"], json!(true));

    // unknown tools yield a synthetic disabled descriptor, not a 404
    let (status, payload) = daemon.get("/api/v1/tools/launch_rocket/permissions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["permission_profile"], json!("unknown"));
    assert_eq!(payload["enabled"], json!(false));
}

#[tokio::test]
async fn plan_import_round_trips_with_default_fill_ins_and_clamping() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "round trip plan",
                "steps": [
                    {"id": "step_001", "title": "List files", "tool": "list_dir", "inputs": {"path": "."}},
                    {"id": "step_002", "title": "Slow step", "tool": "list_dir", "timeout_sec": 999},
                ],
            }),
        )
        .await;

    let (status, payload) = daemon
        .get(&format!("/api/v1/sessions/{session_id}/plans/1"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["version"], json!(1));
    assert_eq!(payload["title"], json!("round trip plan"));

    let steps = payload["steps"].as_array().unwrap();
    assert_eq!(steps[0]["id"], json!("step_001"));
    assert_eq!(steps[0]["tool"], json!("list_dir"));
    assert_eq!(steps[0]["status"], json!("pending"));
    assert_eq!(steps[0]["risk"], json!("low"));
    assert_eq!(steps[0]["timeout_sec"], json!(30));
    assert_eq!(steps[0]["inputs"], json!({"path": "."}));
    // out-of-range timeouts are clamped on import
    assert_eq!(steps[1]["timeout_sec"], json!(120));

    let events = daemon.search_events(&session_id, Some("imported")).await;
    assert!(!events.is_empty());

    assert!(daemon.list_artifacts(&session_id).await.is_empty());
}

#[tokio::test]
async fn plan_import_rejects_non_positive_versions() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    let (status, payload) = daemon
        .post(
            &format!("/api/v1/sessions/{session_id}/plans/import"),
            json!({"version": 0, "title": "bad", "steps": []}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(payload["detail"].as_str().unwrap().contains("version"));
}

#[tokio::test]
async fn re_importing_a_version_replaces_its_steps() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "api test"})).await;
    daemon.import_plan(&session_id, list_dir_plan(1, "old_step")).await;
    daemon.import_plan(&session_id, list_dir_plan(1, "new_step")).await;

    let (status, payload) = daemon
        .get(&format!("/api/v1/sessions/{session_id}/plans/1"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let steps = payload["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["id"], json!("new_step"));
}

#[tokio::test]
async fn events_journal_is_append_only() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "append only"})).await;

    let pool = daemon.raw_db().await;
    let update = sqlx::query("UPDATE events SET summary = 'tampered' WHERE session_id = ?")
        .bind(&session_id)
        .execute(&pool)
        .await;
    assert!(update.err().unwrap().to_string().contains("append-only"));

    let delete = sqlx::query("DELETE FROM events WHERE session_id = ?")
        .bind(&session_id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());

    let events = daemon.search_events(&session_id, None).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], json!("session_created"));
}
