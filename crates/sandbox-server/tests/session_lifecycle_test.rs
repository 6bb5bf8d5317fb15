//! Drives the REST façade end to end: register a template, create an
//! ephemeral session, submit code, and observe the execution accepted —
//! the full `POST /sessions` -> `POST /sessions/{id}/execute` -> `GET
//! /executions/{id}/status` path a client actually exercises.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use sandbox_backend::mock::MockBackend;
use sandbox_core::config::{BackendSelector, Config, DISABLED};
use sandbox_core::model::SessionStatus;
use sandbox_server::state::AppState;
use sqlx::PgPool;
use tower::ServiceExt;

/// Binds an executor stand-in that always acknowledges `/execute`.
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

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn ephemeral_session_accepts_an_execution_through_the_rest_surface() {
    let database_url = match std::env::var("TEST_SANDBOX_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: TEST_SANDBOX_DATABASE_URL not set");
            return;
        }
    };

    let pool = PgPool::connect(&database_url).await.expect("connect to test database");
    sandbox_store::migrations::run(&pool).await.expect("run migrations");

    let executor_port = spawn_ack_only_executor().await;

    let runtime = sandbox_control::ControlPlaneRuntime::builder()
        .pool(pool.clone())
        .backend(Arc::new(MockBackend::new()))
        .control_plane_url("http://localhost:8080")
        .internal_api_token("test-internal-token")
        .workspace_root("/tmp/sandbox-workspaces")
        .executor_port(executor_port)
        .readiness_timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("build runtime config")
        .start()
        .await;

    let config = Config {
        database_url,
        control_plane_url: "http://localhost:8080".to_string(),
        internal_api_token: "test-internal-token".to_string(),
        default_timeout_secs: 30,
        max_timeout_secs: 3600,
        idle_threshold_minutes: DISABLED,
        max_lifetime_hours: DISABLED,
        cleanup_interval_secs: 300,
        disable_bwrap: true,
        workspace_path: "/tmp/sandbox-workspaces".to_string(),
        executor_port,
        backend_selector: BackendSelector::Local,
        log_level: "info".to_string(),
    };

    let state = AppState::new(runtime, config);
    let app = sandbox_server::build_router(state);

    let template_id = "server-e2e-hello-world";
    let register_body = serde_json::json!({
        "id": template_id,
        "name": "hello world",
        "image": "sandbox-template-python-basic:latest",
        "runtime_kind": "process",
        "default_limits": {"cpu_cores": 1.0, "memory_bytes": 536870912, "disk_bytes": 1073741824, "max_processes": null},
        "default_timeout_secs": 30
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/templates")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&register_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let create_body = serde_json::json!({"template_id": template_id, "mode": "ephemeral"});
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/sessions")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let session = json_body(response).await;
    assert_eq!(session["status"], "RUNNING");
    let session_id = session["id"].as_str().unwrap().to_string();

    let execute_body = serde_json::json!({"code": "print('hello')", "language": "python"});
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/sessions/{session_id}/execute"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&execute_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json_body(response).await;
    let execution_id = accepted["execution_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/v1/executions/{execution_id}/status"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["status"], "RUNNING");

    sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(uuid::Uuid::parse_str(&session_id).unwrap())
        .execute(&pool)
        .await
        .ok();
    sqlx::query("DELETE FROM templates WHERE id = $1")
        .bind(template_id)
        .execute(&pool)
        .await
        .ok();
}

#[tokio::test]
async fn unknown_template_returns_not_found() {
    let database_url = match std::env::var("TEST_SANDBOX_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: TEST_SANDBOX_DATABASE_URL not set");
            return;
        }
    };

    let pool = PgPool::connect(&database_url).await.expect("connect to test database");
    sandbox_store::migrations::run(&pool).await.expect("run migrations");

    let runtime = sandbox_control::ControlPlaneRuntime::builder()
        .pool(pool.clone())
        .backend(Arc::new(MockBackend::new()))
        .internal_api_token("test-internal-token")
        .build()
        .expect("build runtime config")
        .start()
        .await;

    let config = Config {
        database_url,
        control_plane_url: "http://localhost:8080".to_string(),
        internal_api_token: "test-internal-token".to_string(),
        default_timeout_secs: 30,
        max_timeout_secs: 3600,
        idle_threshold_minutes: DISABLED,
        max_lifetime_hours: DISABLED,
        cleanup_interval_secs: 300,
        disable_bwrap: true,
        workspace_path: "/tmp/sandbox-workspaces".to_string(),
        executor_port: 8900,
        backend_selector: BackendSelector::Local,
        log_level: "info".to_string(),
    };

    let state = AppState::new(runtime, config);
    let app = sandbox_server::build_router(state);

    let create_body = serde_json::json!({"template_id": "server-e2e-does-not-exist"});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/sessions")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
