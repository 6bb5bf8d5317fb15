//! Sandbox Control Plane — REST façade and internal callback API.
//!
//! Wires the database, a Backend Adapter Port implementation, and the
//! scheduler/dispatch engine/reaper runtime onto an axum HTTP server.

use std::sync::Arc;

use tracing::{info, warn};

use sandbox_backend::cluster::ClusterBackend;
use sandbox_backend::docker::DockerBackend;
use sandbox_backend::Backend;
use sandbox_control::ControlPlaneRuntime;
use sandbox_core::config::{BackendSelector, Config};
use sandbox_store::migrations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sandbox_server=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("no .env file loaded: {e}");
    }

    let config = Config::from_env()?;

    info!(
        backend_selector = ?config.backend_selector,
        executor_port = config.executor_port,
        "starting sandbox control plane"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    migrations::run(&pool).await?;
    info!("database schema up to date");

    let backend: Arc<dyn Backend> = match config.backend_selector {
        BackendSelector::Local => Arc::new(DockerBackend::connect_with_defaults()?),
        BackendSelector::Cluster => Arc::new(ClusterBackend::connect("default").await?),
    };
    info!(backend_type = backend.backend_type(), "backend adapter ready");

    let reaper_config = sandbox_control::reaper::ReaperConfig {
        idle_threshold_minutes: config.idle_threshold_minutes,
        max_lifetime_hours: config.max_lifetime_hours,
        reap_interval: std::time::Duration::from_secs(config.cleanup_interval_secs),
        ..Default::default()
    };

    let runtime = ControlPlaneRuntime::builder()
        .pool(pool)
        .backend(backend)
        .control_plane_url(config.control_plane_url.clone())
        .internal_api_token(config.internal_api_token.clone())
        .workspace_root(config.workspace_path.clone())
        .executor_port(config.executor_port)
        .reaper_config(reaper_config)
        .build()?
        .start()
        .await;

    let app_state = sandbox_server::AppState::new(runtime, config.clone());
    let router = sandbox_server::build_router(app_state.clone());

    let addr = format!("0.0.0.0:{}", std::env::var("PORT").unwrap_or_else(|_| "8080".into()));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "sandbox control plane ready");

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    serve.await?;

    info!("http server stopped, shutting down control plane");
    Arc::try_unwrap(app_state.runtime)
        .map_err(|_| anyhow::anyhow!("runtime handle still shared"))?
        .shutdown()
        .await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
