//! `${steps.<id>.output}` reference resolution through the full pipeline.

use axum::http::StatusCode;
use serde_json::json;

use foreman_testing::TestDaemon;

#[tokio::test]
async fn step_output_references_resolve_for_apply_and_field_paths() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon
        .create_session(json!({"goal": "step references", "safety_profile": "dev"}))
        .await;

    let target_path = "notes/reference_demo.txt";
    let target_content = "reference demo\n";
    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "step output references",
                "session_goal": "resolve step output references",
                "steps": [
                    {
                        "id": "step_preview",
                        "title": "preview write",
                        "tool": "write_file_preview",
                        "inputs": {"path": target_path, "content": target_content},
                        "timeout_sec": 30,
                    },
                    {
                        "id": "step_apply",
                        "title": "apply write",
                        "tool": "write_file_apply",
                        "inputs": {
                            "path": target_path,
                            "content": target_content,
                            "preview": "${steps.step_preview.output}",
                            "meta": {
                                "trace": [
                                    {"preview_path": "${steps.step_preview.output.path}"}
                                ]
                            },
                        },
                        "timeout_sec": 30,
                    },
                    {
                        "id": "step_read_back",
                        "title": "read applied file",
                        "tool": "read_file",
                        "inputs": {"path": "${steps.step_apply.output.path}"},
                        "timeout_sec": 30,
                    },
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;
    for step_id in ["step_preview", "step_apply", "step_read_back"] {
        daemon.approve_step(&session_id, step_id).await;
    }

    let (status, payload) = daemon.execute_step(&session_id, "step_preview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));

    let (status, payload) = daemon.execute_step(&session_id, "step_apply").await;
    assert_eq!(status, StatusCode::OK, "apply failed: {payload}");
    assert_eq!(payload["status"], json!("succeeded"));
    assert_eq!(payload["output"]["applied"], json!(true));

    let (status, payload) = daemon.execute_step(&session_id, "step_read_back").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));
    assert_eq!(payload["output"]["content"], json!(target_content));

    let written = daemon.workspace_root(&session_id).join(target_path);
    assert_eq!(std::fs::read_to_string(written).unwrap(), target_content);
}

#[tokio::test]
async fn unresolvable_reference_is_rejected_with_409() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon
        .create_session(json!({"goal": "step references", "safety_profile": "dev"}))
        .await;

    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "step output reference failure",
                "session_goal": "reject unresolved reference",
                "steps": [
                    {
                        "id": "step_preview",
                        "title": "preview write",
                        "tool": "write_file_preview",
                        "inputs": {"path": "notes/fail.txt", "content": "demo\n"},
                        "timeout_sec": 30,
                    },
                    {
                        "id": "step_apply",
                        "title": "apply before preview execution",
                        "tool": "write_file_apply",
                        "inputs": {
                            "path": "notes/fail.txt",
                            "content": "demo\n",
                            "preview": "${steps.step_preview.output}",
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

    // step_apply runs first: step_preview has no succeeded run yet.
    let (status, payload) = daemon.execute_step(&session_id, "step_apply").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let detail = payload["detail"].as_str().unwrap();
    assert!(detail.contains("step input reference could not be resolved"));
    assert!(detail.contains("${steps.step_preview.output}"));

    // No run was recorded for the refused execution.
    let pool = daemon.raw_db().await;
    let (runs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs WHERE session_id = ?")
        .bind(&session_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(runs, 0);
}
