//! Drives `DispatchEngine::submit` against a local HTTP stand-in for the
//! in-container executor, covering the happy path, the two guard clauses
//! that never touch the network, and the watchdog's timeout/crash
//! attribution once a submitted execution never reports back.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use common::TestContext;
use sandbox_backend::mock::MockBackend;
use sandbox_backend::{Backend, ContainerSpec, MountSpec};
use sandbox_control::dispatch::DispatchEngine;
use sandbox_core::model::{
    ExecutionStatus, ResourceLimit, Session, SessionMode, SessionStatus,
};

/// Binds an executor stand-in that always acknowledges `/execute` and never
/// calls back, so the caller can exercise the watchdog path deterministically.
async fn spawn_ack_only_executor() -> u16 {
    let app = Router::new().route(
        "/execute",
        post(|| async { Json(serde_json::json!({"execution_id": uuid::Uuid::nil(), "status": "running"})) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn running_session(template_id: &str, container_id: Option<&str>, node: &str) -> Session {
    let now = chrono::Utc::now();
    Session {
        id: sandbox_core::ids::SessionId::new(),
        template_id: sandbox_core::ids::TemplateId::from(template_id),
        mode: SessionMode::Ephemeral,
        status: SessionStatus::Running,
        resource_limit: ResourceLimit {
            cpu_cores: 1.0,
            memory_bytes: 512 << 20,
            disk_bytes: 1 << 30,
            max_processes: None,
        },
        workspace_path: "/tmp/sandbox-workspaces/dispatch-test".to_string(),
        runtime_kind: "process".to_string(),
        runtime_node_id: Some(node.to_string()),
        container_id: container_id.map(str::to_string),
        pod_name: None,
        env: HashMap::new(),
        timeout_secs: 1,
        created_at: now,
        updated_at: now,
        completed_at: None,
        last_activity_at: now,
    }
}

#[tokio::test]
async fn submit_marks_execution_running_once_the_executor_acks() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("dispatch-test-happy-path", 30).await;
    let port = spawn_ack_only_executor().await;

    let session = running_session(&template.id.0, Some("dispatch-container-1"), "127.0.0.1");
    ctx.sessions.create(&session).await.expect("seed running session");

    let dispatch = DispatchEngine::new(
        ctx.sessions.clone(),
        ctx.executions.clone(),
        Arc::new(MockBackend::new()),
        "internal-token".to_string(),
        port,
    );

    let execution = dispatch
        .submit(
            session.id,
            "print('hello')".to_string(),
            "python".to_string(),
            30,
            serde_json::json!({}),
            HashMap::new(),
        )
        .await
        .expect("submit succeeds");

    let persisted = ctx.executions.get(execution.id).await.expect("execution persisted");
    assert_eq!(persisted.status, ExecutionStatus::Running);

    ctx.cleanup(&[session.id], &["dispatch-test-happy-path"]).await;
}

#[tokio::test]
async fn submit_rejects_code_against_a_session_that_is_not_running() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("dispatch-test-non-running", 30).await;

    let mut session = running_session(&template.id.0, None, "127.0.0.1");
    session.status = SessionStatus::Pending;
    ctx.sessions.create(&session).await.expect("seed pending session");

    let dispatch = DispatchEngine::new(
        ctx.sessions.clone(),
        ctx.executions.clone(),
        Arc::new(MockBackend::new()),
        "internal-token".to_string(),
        8900,
    );

    let err = dispatch
        .submit(
            session.id,
            "print('hello')".to_string(),
            "python".to_string(),
            30,
            serde_json::json!({}),
            HashMap::new(),
        )
        .await
        .expect_err("non-running session is rejected");

    assert!(matches!(
        err,
        sandbox_control::ControlError::Domain(sandbox_core::Error::Conflict(_))
    ));

    ctx.cleanup(&[session.id], &["dispatch-test-non-running"]).await;
}

/// The watchdog fires after `timeout + 10s` grace with no terminal callback.
/// A container the backend still reports as running is attributed to a
/// timeout; one the backend can no longer find is attributed to a crash.
#[tokio::test]
async fn watchdog_distinguishes_timeout_from_crash_by_container_reachability() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("dispatch-test-watchdog", 30).await;
    let port = spawn_ack_only_executor().await;
    let backend = Arc::new(MockBackend::new());

    let spec = ContainerSpec {
        session_id: "watchdog-timeout".to_string(),
        image: template.image.clone(),
        limits: template.default_limits,
        env: HashMap::new(),
        mounts: vec![MountSpec {
            host_path: "/tmp".to_string(),
            container_path: "/workspace".to_string(),
            read_only: false,
        }],
        network_mode: "none".to_string(),
        sandbox_label: "watchdog-timeout".to_string(),
        uid: 1000,
        gid: 1000,
    };
    let reachable_container = backend.create_container("mock-node-0", &spec).await.unwrap();

    let timeout_session = running_session(&template.id.0, Some(&reachable_container), "127.0.0.1");
    let crash_session = running_session(&template.id.0, Some("never-created-container"), "127.0.0.1");
    ctx.sessions.create(&timeout_session).await.unwrap();
    ctx.sessions.create(&crash_session).await.unwrap();

    let dispatch = DispatchEngine::new(
        ctx.sessions.clone(),
        ctx.executions.clone(),
        backend,
        "internal-token".to_string(),
        port,
    );

    let timeout_execution = dispatch
        .submit(timeout_session.id, "sleep(5)".to_string(), "python".to_string(), 1, serde_json::json!({}), HashMap::new())
        .await
        .expect("submit succeeds");
    let crash_execution = dispatch
        .submit(crash_session.id, "sleep(5)".to_string(), "python".to_string(), 1, serde_json::json!({}), HashMap::new())
        .await
        .expect("submit succeeds");

    // Watchdog grace is a fixed 10s; give it a comfortable margin.
    tokio::time::sleep(Duration::from_secs(12)).await;

    let timeout_result = ctx.executions.get(timeout_execution.id).await.unwrap();
    let crash_result = ctx.executions.get(crash_execution.id).await.unwrap();

    assert_eq!(timeout_result.status, ExecutionStatus::Timeout);
    assert_eq!(crash_result.status, ExecutionStatus::Crashed);

    ctx.cleanup(&[timeout_session.id, crash_session.id], &["dispatch-test-watchdog"]).await;
}
