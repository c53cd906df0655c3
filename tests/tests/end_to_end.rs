//! End-to-end flows: the happy path and failure-then-replan recovery.

use axum::http::StatusCode;
use serde_json::{Value, json};

use foreman_testing::TestDaemon;

#[tokio::test]
async fn success_flow_executes_all_steps_and_records_outputs() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "e2e"})).await;

    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "e2e success flow",
                "session_goal": "validate successful end-to-end flow",
                "steps": [
                    {
                        "id": "step_list",
                        "title": "List workspace",
                        "tool": "list_dir",
                        "inputs": {"path": "."},
                        "timeout_sec": 30,
                    },
                    {
                        "id": "step_shell",
                        "title": "Run readonly shell",
                        "tool": "run_shell_readonly",
                        "inputs": {"command": "ls"},
                        "timeout_sec": 30,
                    },
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;

    for step_id in ["step_list", "step_shell"] {
        daemon.approve_step(&session_id, step_id).await;
        let (status, payload) = daemon.execute_step(&session_id, step_id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], json!("succeeded"));
        assert_eq!(payload["error"], Value::Null);
    }

    let session = daemon.session(&session_id).await;
    assert_eq!(session["status"], json!("succeeded"));
    assert_eq!(session["needs_replan"], json!(false));

    let events = daemon.search_events(&session_id, None).await;
    assert!(events.iter().any(|e| e["event_type"] == json!("plan_approved")));
    let executed = events
        .iter()
        .filter(|e| e["event_type"] == json!("step_executed"))
        .count();
    assert_eq!(executed, 2);

    let artifacts = daemon.list_artifacts(&session_id).await;
    assert_eq!(artifacts.len(), 2);
    for artifact in &artifacts {
        let path = artifact["path"].as_str().unwrap();
        assert!(
            path.starts_with(&format!("data/sessions/{session_id}/artifacts/")),
            "unexpected artifact path {path}"
        );
        assert!(daemon.project_root.join(path).exists());
    }
}

#[tokio::test]
async fn failure_requires_replan_then_recovers_with_new_version() {
    let daemon = TestDaemon::start().await;
    let session_id = daemon.create_session(json!({"goal": "e2e failure recovery"})).await;

    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 1,
                "title": "e2e failure flow",
                "session_goal": "validate failure and recovery flow",
                "steps": [
                    {
                        "id": "v1_step_ok",
                        "title": "First succeeds",
                        "tool": "list_dir",
                        "inputs": {"path": "."},
                        "timeout_sec": 30,
                    },
                    {
                        "id": "v1_step_fail",
                        "title": "Second fails",
                        "tool": "run_shell_readonly",
                        "inputs": {"command": "echo blocked"},
                        "timeout_sec": 30,
                    },
                    {
                        "id": "v1_step_after_fail",
                        "title": "Must not continue",
                        "tool": "list_dir",
                        "inputs": {"path": "."},
                        "timeout_sec": 30,
                    },
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 1).await;
    for step_id in ["v1_step_ok", "v1_step_fail", "v1_step_after_fail"] {
        daemon.approve_step(&session_id, step_id).await;
    }

    let (status, payload) = daemon.execute_step(&session_id, "v1_step_ok").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));

    // A tool failure is a recorded outcome, not an HTTP error.
    let (status, payload) = daemon.execute_step(&session_id, "v1_step_fail").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("failed"));
    assert!(
        payload["error"].as_str().unwrap().contains("not allowlisted"),
        "unexpected error {}",
        payload["error"]
    );

    let session = daemon.session(&session_id).await;
    assert_eq!(session["status"], json!("failed"));
    assert_eq!(session["needs_replan"], json!(true));

    // The sticky replan flag blocks any further execution.
    let (status, payload) = daemon.execute_step(&session_id, "v1_step_after_fail").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(payload["detail"].as_str().unwrap().contains("needs replan"));

    // A new plan version clears the flag and the session recovers.
    daemon
        .import_plan(
            &session_id,
            json!({
                "version": 2,
                "title": "e2e recovery flow",
                "session_goal": "recover with new plan version",
                "steps": [
                    {
                        "id": "v2_step_resume",
                        "title": "Resume with new plan",
                        "tool": "list_dir",
                        "inputs": {"path": "."},
                        "timeout_sec": 30,
                    }
                ],
            }),
        )
        .await;
    daemon.approve_plan(&session_id, 2).await;
    daemon.approve_step(&session_id, "v2_step_resume").await;

    let (status, payload) = daemon.execute_step(&session_id, "v2_step_resume").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("succeeded"));
    assert_eq!(payload["error"], Value::Null);

    let session = daemon.session(&session_id).await;
    assert_eq!(session["status"], json!("succeeded"));
    assert_eq!(session["plan_version"], json!(2));
    assert_eq!(session["needs_replan"], json!(false));

    let events = daemon.search_events(&session_id, Some("step")).await;
    assert!(events.iter().any(|e| e["event_type"] == json!("step_failed")));
    assert!(
        events
            .iter()
            .any(|e| e["summary"] == json!("step v2_step_resume executed"))
    );
}
