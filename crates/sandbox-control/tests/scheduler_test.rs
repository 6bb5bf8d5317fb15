//! Drives `Scheduler::schedule` against a real Postgres-backed session
//! store and an in-memory `MockBackend`, covering the ephemeral
//! hello-world happy path and the image-pull failure path.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::TestContext;
use sandbox_backend::mock::MockBackend;
use sandbox_control::scheduler::{ReadinessRegistry, Scheduler, SessionDraft};
use sandbox_core::model::SessionMode;

#[tokio::test]
async fn schedule_brings_an_ephemeral_session_to_running() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("scheduler-test-hello-world", 30).await;

    let scheduler = Scheduler::new(
        ctx.sessions.clone(),
        Arc::new(MockBackend::new()),
        ReadinessRegistry::new(),
        "http://localhost:8080".to_string(),
        "/tmp/sandbox-workspaces".to_string(),
        Duration::from_secs(30),
    );

    let draft = SessionDraft {
        template: template.clone(),
        mode: SessionMode::Ephemeral,
        requested_limit: None,
        env: HashMap::new(),
        timeout_secs: None,
    };

    let session = scheduler.schedule(draft, "internal-token").await.expect("schedule succeeds");

    assert_eq!(session.status, sandbox_core::model::SessionStatus::Running);
    assert!(session.container_id.is_some());
    assert!(session.runtime_node_id.is_some());

    let persisted = ctx.sessions.get(session.id).await.expect("session persisted");
    assert_eq!(persisted.status, sandbox_core::model::SessionStatus::Running);

    ctx.cleanup(&[session.id], &["scheduler-test-hello-world"]).await;
}

#[tokio::test]
async fn schedule_fails_the_session_when_the_backend_cannot_pull_the_image() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("scheduler-test-image-pull-failure", 30).await;

    let scheduler = Scheduler::new(
        ctx.sessions.clone(),
        Arc::new(MockBackend::failing()),
        ReadinessRegistry::new(),
        "http://localhost:8080".to_string(),
        "/tmp/sandbox-workspaces".to_string(),
        Duration::from_secs(30),
    );

    let draft = SessionDraft {
        template: template.clone(),
        mode: SessionMode::Ephemeral,
        requested_limit: None,
        env: HashMap::new(),
        timeout_secs: None,
    };

    let err = scheduler
        .schedule(draft, "internal-token")
        .await
        .expect_err("image pull failure surfaces as a scheduling error");

    let sessions = ctx
        .sessions
        .list(&sandbox_store::session_store::SessionFilter {
            status: Some(sandbox_core::model::SessionStatus::Failed),
            template_id: Some(sandbox_core::ids::TemplateId::from("scheduler-test-image-pull-failure")),
            limit: 10,
            offset: 0,
        })
        .await
        .expect("list sessions");

    assert_eq!(sessions.len(), 1);
    drop(err);

    ctx.cleanup(&[sessions[0].id], &["scheduler-test-image-pull-failure"]).await;
}
