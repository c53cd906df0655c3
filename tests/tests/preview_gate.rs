//! The preview-gate and the two-phase write discipline over the HTTP API.

use axum::http::StatusCode;
use serde_json::{Value, json};

use foreman_foundation::tools::write_ops::{sha256_hex, write_file_preview};
use foreman_testing::TestDaemon;

#[tokio::test]
async fn write_apply_without_preview_is_rejected_and_recorded() {
    let daemon = TestDaemon::start().await;
    // default profile is strict
    let session_id = daemon.create_session(json!({"goal": "preview gate"})).await;

    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "preview gate reject",
                "session_goal": "reject apply without preview",
                "steps": [
                    {
                        "id": "step_apply",
                        "title": "apply without preview",
                        "tool": "write_file_apply",
                        "inputs": {"path": "memo.txt", "content": "after\n"},
                        "timeout_sec": 30,
                    }
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_apply").await;

    let (status, payload) = daemon.execute_step(&session_id, "step_apply").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("failed"));
    assert!(
        payload["error"]
            .as_str()
            .unwrap()
            .contains("preview gate rejected")
    );
    assert!(!daemon.workspace_root(&session_id).join("memo.txt").exists());

    // The refusal is persisted: a failed run row and a step_failed event.
    let pool = daemon.raw_db().await;
    let (run_status, failure_reason): (String, Option<String>) = sqlx::query_as(
        "SELECT status, failure_reason FROM runs WHERE session_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(&session_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(run_status, "failed");
    assert!(failure_reason.unwrap().contains("preview gate rejected"));

    let run_id = payload["run_id"].as_i64().unwrap();
    let (event_type, payload_text): (String, String) = sqlx::query_as(
        "SELECT event_type, payload_text FROM events
         WHERE session_id = ? AND run_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(&session_id)
    .bind(run_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(event_type, "step_failed");
    assert!(payload_text.contains("preview gate rejected"));
}

#[tokio::test]
async fn write_apply_succeeds_with_matching_preview() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "preview gate allow"})).await;

    let workspace_root = daemon.workspace_root(&session_id);
    let expected_preview =
        write_file_preview(&workspace_root, "memo.txt", "after\n").unwrap();

    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "preview gate allow",
                "session_goal": "allow apply with preview",
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
                        "inputs": {
                            "path": "memo.txt",
                            "content": "after\n",
                            "preview": serde_json::to_value(&expected_preview).unwrap(),
                        },
                        "timeout_sec": 30,
                    },
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_preview").await;
    daemon.approve_step(&session_id, "step_apply").await;

    let (status, payload) = daemon.execute_step(&session_id, "step_preview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));

    let (status, payload) = daemon.execute_step(&session_id, "step_apply").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));
    assert_eq!(payload["error"], Value::Null);
    assert_eq!(payload["output"]["applied"], json!(true));

    let written = std::fs::read_to_string(workspace_root.join("memo.txt")).unwrap();
    assert_eq!(written, "after\n");
    assert_eq!(sha256_hex(&written), expected_preview.new_sha256);

    let pool = daemon.raw_db().await;
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT status FROM runs WHERE session_id = ? ORDER BY id")
            .bind(&session_id)
            .fetch_all(&pool)
            .await
            .unwrap();
    let statuses: Vec<&str> = rows.iter().map(|(s,)| s.as_str()).collect();
    assert_eq!(statuses, ["succeeded", "succeeded"]);
}

#[tokio::test]
async fn dev_profile_skips_the_gate_but_still_validates_supplied_previews() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon
        .create_session(json!({"goal": "dev profile", "safety_profile": "dev"}))
        .await;

    // No preview at all: the dev profile lets the handler run.
    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "dev apply",
                "steps": [
                    {
                        "id": "step_apply",
                        "title": "apply without preview",
                        "tool": "write_file_apply",
                        "inputs": {"path": "memo.txt", "content": "v1\n"},
                        "timeout_sec": 30,
                    },
                    {
                        "id": "step_apply_stale",
                        "title": "apply with stale preview",
                        "tool": "write_file_apply",
                        "inputs": {
                            "path": "memo.txt",
                            "content": "v2\n",
                            // stale: recorded against an empty file
                            "preview": {"path": "memo.txt", "diff": "", "new_sha256": "bogus"},
                        },
                        "timeout_sec": 30,
                    },
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;
    daemon.approve_step(&session_id, "step_apply").await;
    daemon.approve_step(&session_id, "step_apply_stale").await;

    let (status, payload) = daemon.execute_step(&session_id, "step_apply").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));
    assert_eq!(
        std::fs::read_to_string(daemon.workspace_root(&session_id).join("memo.txt")).unwrap(),
        "v1\n"
    );

    // The handler's own mismatch check still applies in dev.
    let (status, payload) = daemon.execute_step(&session_id, "step_apply_stale").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("failed"));
    assert!(
        payload["error"]
            .as_str()
            .unwrap()
            .contains("provided preview does not match current file state")
    );
    // the stale apply never touched the file
    assert_eq!(
        std::fs::read_to_string(daemon.workspace_root(&session_id).join("memo.txt")).unwrap(),
        "v1\n"
    );
}
