//! Embeddable runtime wiring together the scheduler, dispatch engine, and
//! reconciler/reaper behind one handle.
//!
//! Grounded on the teacher's `EnvironmentRuntimeBuilder`: a fluent builder
//! with sensible defaults, a `build()` that validates required fields, and
//! a `start()` that spawns background workers and returns a handle whose
//! `shutdown()` stops them in turn.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sandbox_control::runtime::ControlPlaneRuntime;
//!
//! let runtime = ControlPlaneRuntime::builder()
//!     .pool(pool)
//!     .backend(backend)
//!     .control_plane_url("http://localhost:8080")
//!     .internal_api_token("secret")
//!     .build()?
//!     .start()
//!     .await;
//!
//! // ... serve requests against runtime.scheduler() / runtime.dispatch() ...
//!
//! runtime.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use sandbox_backend::Backend;
use sandbox_store::{ExecutionStore, SessionStore, TemplateStore};

use crate::dispatch::DispatchEngine;
use crate::reaper::{Reaper, ReaperConfig};
use crate::scheduler::{ReadinessRegistry, Scheduler};

/// Builder for [`ControlPlaneRuntime`].
pub struct ControlPlaneRuntimeBuilder {
    pool: Option<PgPool>,
    backend: Option<Arc<dyn Backend>>,
    control_plane_url: String,
    internal_api_token: Option<String>,
    workspace_root: String,
    executor_port: u16,
    readiness_timeout: Duration,
    reaper_config: ReaperConfig,
}

impl Default for ControlPlaneRuntimeBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            backend: None,
            control_plane_url: "http://localhost:8080".to_string(),
            internal_api_token: None,
            workspace_root: "/var/lib/sandbox/workspaces".to_string(),
            executor_port: 8900,
            readiness_timeout: Duration::from_secs(60),
            reaper_config: ReaperConfig::default(),
        }
    }
}

impl ControlPlaneRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the PostgreSQL connection pool (required).
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the Backend Adapter Port implementation (required).
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Address executors use to reach the control plane's callback API.
    ///
    /// Default: `http://localhost:8080`
    pub fn control_plane_url(mut self, url: impl Into<String>) -> Self {
        self.control_plane_url = url.into();
        self
    }

    /// Bearer token executors must present on internal callbacks (required).
    pub fn internal_api_token(mut self, token: impl Into<String>) -> Self {
        self.internal_api_token = Some(token.into());
        self
    }

    /// Host directory under which per-session workspace mounts are created.
    ///
    /// Default: `/var/lib/sandbox/workspaces`
    pub fn workspace_root(mut self, path: impl Into<String>) -> Self {
        self.workspace_root = path.into();
        self
    }

    /// Port the executor daemon listens on inside every container.
    ///
    /// Default: 8900
    pub fn executor_port(mut self, port: u16) -> Self {
        self.executor_port = port;
        self
    }

    /// Upper bound on the scheduler's wait for `container_ready` (spec.md §4.2 step 4).
    ///
    /// Default: 60 seconds
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Reconciler/reaper tuning (spec.md §4.6).
    pub fn reaper_config(mut self, config: ReaperConfig) -> Self {
        self.reaper_config = config;
        self
    }

    pub fn build(self) -> crate::error::Result<ControlPlaneRuntimeConfig> {
        let pool = self
            .pool
            .ok_or_else(|| crate::error::ControlError::Other("pool is required".into()))?;
        let backend = self
            .backend
            .ok_or_else(|| crate::error::ControlError::Other("backend is required".into()))?;
        let internal_api_token = self.internal_api_token.ok_or_else(|| {
            crate::error::ControlError::Other("internal_api_token is required".into())
        })?;

        Ok(ControlPlaneRuntimeConfig {
            pool,
            backend,
            control_plane_url: self.control_plane_url,
            internal_api_token,
            workspace_root: self.workspace_root,
            executor_port: self.executor_port,
            readiness_timeout: self.readiness_timeout,
            reaper_config: self.reaper_config,
        })
    }
}

/// Validated configuration ready to [`start`](Self::start).
pub struct ControlPlaneRuntimeConfig {
    pool: PgPool,
    backend: Arc<dyn Backend>,
    control_plane_url: String,
    internal_api_token: String,
    workspace_root: String,
    executor_port: u16,
    readiness_timeout: Duration,
    reaper_config: ReaperConfig,
}

impl ControlPlaneRuntimeConfig {
    /// Run startup state-sync, then spawn the reaper's periodic loop and
    /// return a handle holding the scheduler and dispatch engine.
    pub async fn start(self) -> ControlPlaneRuntime {
        let sessions = Arc::new(SessionStore::new(self.pool.clone()));
        let executions = Arc::new(ExecutionStore::new(self.pool.clone()));
        let templates = Arc::new(TemplateStore::new(self.pool.clone()));
        let readiness = ReadinessRegistry::new();

        let scheduler = Arc::new(Scheduler::new(
            sessions.clone(),
            self.backend.clone(),
            readiness.clone(),
            self.control_plane_url.clone(),
            self.workspace_root.clone(),
            self.readiness_timeout,
        ));

        let dispatch = Arc::new(DispatchEngine::new(
            sessions.clone(),
            executions.clone(),
            self.backend.clone(),
            self.internal_api_token.clone(),
            self.executor_port,
        ));

        let reaper = Reaper::new(
            sessions.clone(),
            executions.clone(),
            self.backend.clone(),
            self.reaper_config,
        );
        let reaper_shutdown = reaper.shutdown_handle();

        let reaper_handle = tokio::spawn(async move {
            reaper.run().await;
        });

        info!(
            control_plane_url = %self.control_plane_url,
            executor_port = self.executor_port,
            "control plane runtime started"
        );

        ControlPlaneRuntime {
            sessions,
            executions,
            templates,
            backend: self.backend,
            scheduler,
            dispatch,
            readiness,
            reaper_handle,
            reaper_shutdown,
        }
    }
}

/// A running control plane: scheduler, dispatch engine, and reaper wired to
/// a shared store and backend. Owned by `sandbox-server`'s HTTP layer.
pub struct ControlPlaneRuntime {
    sessions: Arc<SessionStore>,
    executions: Arc<ExecutionStore>,
    templates: Arc<TemplateStore>,
    backend: Arc<dyn Backend>,
    scheduler: Arc<Scheduler>,
    dispatch: Arc<DispatchEngine>,
    readiness: ReadinessRegistry,
    reaper_handle: JoinHandle<()>,
    reaper_shutdown: Arc<Notify>,
}

impl ControlPlaneRuntime {
    pub fn builder() -> ControlPlaneRuntimeBuilder {
        ControlPlaneRuntimeBuilder::new()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn executions(&self) -> &Arc<ExecutionStore> {
        &self.executions
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    /// Direct backend access for operations the scheduler/dispatch/reaper
    /// don't own, e.g. a client-initiated `DELETE /sessions/{id}` cancellation.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn dispatch(&self) -> &Arc<DispatchEngine> {
        &self.dispatch
    }

    /// Shared with the `/internal/containers/ready` handler so it can wake
    /// the scheduler's readiness wait.
    pub fn readiness(&self) -> &ReadinessRegistry {
        &self.readiness
    }

    /// Signal the reaper to stop and wait for it to drain its current pass.
    pub async fn shutdown(self) {
        info!("control plane runtime shutting down");
        self.reaper_shutdown.notify_one();
        let _ = self.reaper_handle.await;
    }
}
