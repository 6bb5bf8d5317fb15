//! Shared handler state: the wired-up control plane plus the settings
//! handlers need directly (the internal callback bearer token).

use std::sync::Arc;

use sandbox_control::ControlPlaneRuntime;
use sandbox_core::config::Config;

/// Cloned into every axum handler via `State`.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ControlPlaneRuntime>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(runtime: ControlPlaneRuntime, config: Config) -> Self {
        Self {
            runtime: Arc::new(runtime),
            config: Arc::new(config),
        }
    }
}
