//! In-container sandbox executor process (spec.md §4.5).
//!
//! Verifies OS-level isolation is available, serves `/health` and
//! `/execute`, reports readiness to the control plane once listening, and
//! reports its own exit on SIGTERM.

use std::sync::atomic::Ordering;

use tracing::{error, info, warn};

use sandbox_core::model::ExecutionMetrics;
use sandbox_executor::config::ExecutorConfig;
use sandbox_executor::isolation::verify_isolation_available;
use sandbox_executor::{build_router, ExecutorState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sandbox_executor=info".into()),
        )
        .init();

    let config = ExecutorConfig::from_env()?;

    if let Err(e) = verify_isolation_available(config.disable_bwrap).await {
        error!("isolation check failed: {e}");
        std::process::exit(1);
    }

    let executor_port = config.executor_port;
    let session_id = config.session_id;
    let container_id = config.container_id.clone();
    let state = ExecutorState::new(config);

    let router = build_router(state.clone());
    let addr = format!("0.0.0.0:{executor_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "executor listening");

    state.mark_ready();
    let ready_callback = state.callback.clone();
    let ready_container_id = container_id.clone();
    tokio::spawn(async move {
        ready_callback
            .container_ready(session_id, &ready_container_id, executor_port)
            .await;
    });

    tokio::spawn(handle_sigterm(state.clone(), container_id));

    axum::serve(listener, router).await?;
    Ok(())
}

/// On SIGTERM: mark any in-flight execution CRASHED, report the container
/// exit, then let the process terminate (spec.md §4.5 step 8).
async fn handle_sigterm(state: ExecutorState, container_id: String) {
    let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to install SIGTERM handler: {e}");
            return;
        }
    };
    term.recv().await;
    info!("sigterm received, shutting down");
    state.ready.store(false, Ordering::SeqCst);

    let active = state.active.lock().await.take();
    if let Some(execution_id) = active {
        state
            .callback
            .execution_result(
                execution_id,
                sandbox_core::model::ExecutionStatus::Crashed,
                None,
                Some("executor received SIGTERM during execution".to_string()),
                None,
                None,
                Vec::new(),
                Some(ExecutionMetrics::default()),
                None,
            )
            .await;
    }

    state.callback.container_exited(&container_id, 143, "sigterm").await;
    std::process::exit(0);
}
