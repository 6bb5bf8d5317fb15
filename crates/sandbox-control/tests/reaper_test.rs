//! Drives the `Reaper` against a real Postgres-backed session store and an
//! in-memory `MockBackend`, covering startup reconciliation (crash
//! attribution and orphan container cleanup) and the periodic idle reap.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::TestContext;
use sandbox_backend::mock::MockBackend;
use sandbox_backend::{Backend, ContainerSpec, MountSpec};
use sandbox_control::reaper::{Reaper, ReaperConfig};
use sandbox_core::config::DISABLED;
use sandbox_core::model::{ResourceLimit, Session, SessionMode, SessionStatus};

fn spec(session_id: &str, image: &str) -> ContainerSpec {
    ContainerSpec {
        session_id: session_id.to_string(),
        image: image.to_string(),
        limits: ResourceLimit {
            cpu_cores: 1.0,
            memory_bytes: 512 << 20,
            disk_bytes: 1 << 30,
            max_processes: None,
        },
        env: HashMap::new(),
        mounts: vec![MountSpec {
            host_path: "/tmp".to_string(),
            container_path: "/workspace".to_string(),
            read_only: false,
        }],
        network_mode: "none".to_string(),
        sandbox_label: session_id.to_string(),
        uid: 1000,
        gid: 1000,
    }
}

fn running_session(template_id: &str, container_id: Option<&str>, last_activity_at: chrono::DateTime<chrono::Utc>) -> Session {
    let now = chrono::Utc::now();
    Session {
        id: sandbox_core::ids::SessionId::new(),
        template_id: sandbox_core::ids::TemplateId::from(template_id),
        mode: SessionMode::Persistent,
        status: SessionStatus::Running,
        resource_limit: ResourceLimit {
            cpu_cores: 1.0,
            memory_bytes: 512 << 20,
            disk_bytes: 1 << 30,
            max_processes: None,
        },
        workspace_path: "/tmp/sandbox-workspaces/reaper-test".to_string(),
        runtime_kind: "process".to_string(),
        runtime_node_id: Some("mock-node-0".to_string()),
        container_id: container_id.map(str::to_string),
        pod_name: None,
        env: HashMap::new(),
        timeout_secs: 30,
        created_at: now,
        updated_at: now,
        completed_at: None,
        last_activity_at,
    }
}

#[tokio::test]
async fn startup_reconcile_fails_a_session_whose_container_is_gone() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("reaper-test-crash-attribution", 30).await;
    let backend = Arc::new(MockBackend::new());

    let session = running_session(&template.id.0, Some("container-that-vanished"), chrono::Utc::now());
    ctx.sessions.create(&session).await.expect("seed running session");

    let reaper = Reaper::new(ctx.sessions.clone(), ctx.executions.clone(), backend, ReaperConfig::default());
    reaper.startup_reconcile().await.expect("startup reconcile");

    let persisted = ctx.sessions.get(session.id).await.expect("session still exists");
    assert_eq!(persisted.status, SessionStatus::Failed);

    ctx.cleanup(&[session.id], &["reaper-test-crash-attribution"]).await;
}

#[tokio::test]
async fn startup_reconcile_destroys_orphan_containers_with_no_tracking_session() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("reaper-test-orphan-container", 30).await;
    let backend = Arc::new(MockBackend::new());

    let orphan_id = backend
        .create_container("mock-node-0", &spec("orphan", &template.image))
        .await
        .expect("create orphan container");

    let reaper = Reaper::new(ctx.sessions.clone(), ctx.executions.clone(), backend.clone(), ReaperConfig::default());
    reaper.startup_reconcile().await.expect("startup reconcile");

    let remaining = backend.list_sandbox_containers().await.expect("list containers");
    assert!(!remaining.contains(&orphan_id));

    ctx.cleanup(&[], &["reaper-test-orphan-container"]).await;
}

#[tokio::test]
async fn periodic_reap_terminates_a_session_idle_past_the_threshold() {
    skip_if_no_env_db!();
    let ctx = TestContext::new().await.expect("test database");
    let template = ctx.register_template("reaper-test-idle-reap", 30).await;
    let backend = Arc::new(MockBackend::new());

    let container_id = backend
        .create_container("mock-node-0", &spec("idle-session", &template.image))
        .await
        .expect("create container");

    let two_hours_ago = chrono::Utc::now() - chrono::Duration::hours(2);
    let session = running_session(&template.id.0, Some(&container_id), two_hours_ago);
    ctx.sessions.create(&session).await.expect("seed idle session");

    let reaper = Reaper::new(
        ctx.sessions.clone(),
        ctx.executions.clone(),
        backend,
        ReaperConfig {
            reap_interval: Duration::from_millis(50),
            idle_threshold_minutes: 1,
            max_lifetime_hours: DISABLED,
            termination_grace: Duration::from_millis(10),
        },
    );
    let shutdown = reaper.shutdown_handle();
    let handle = tokio::spawn(async move { reaper.run().await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.notify_one();
    handle.await.expect("reaper task");

    let persisted = ctx.sessions.get(session.id).await.expect("session still exists");
    assert_eq!(persisted.status, SessionStatus::Terminated);
    assert!(persisted.completed_at.is_some());

    ctx.cleanup(&[session.id], &["reaper-test-idle-reap"]).await;
}
