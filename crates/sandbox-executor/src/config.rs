//! Executor settings, loaded from the env vars the scheduler injects into
//! every sandbox container (spec.md §4.2 step 3, §6.4).

use sandbox_core::ids::SessionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub session_id: SessionId,
    pub control_plane_url: String,
    pub internal_api_token: String,
    pub workspace_path: String,
    pub executor_port: u16,
    /// If true, run without OS-level namespace isolation (spec.md §4.5).
    pub disable_bwrap: bool,
    /// The backend-assigned container id, used when reporting
    /// `container_exited`. Not injected by the scheduler (it isn't known
    /// until after the container starts), so this falls back to the
    /// container's own hostname, which Docker sets to its short id.
    pub container_id: String,
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_id_raw = required("SESSION_ID")?;
        let session_id: SessionId = session_id_raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: "SESSION_ID",
                value: session_id_raw,
            })?;

        let control_plane_url = required("CONTROL_PLANE_URL")?;
        let internal_api_token = required("INTERNAL_API_TOKEN")?;
        let workspace_path =
            std::env::var("WORKSPACE_PATH").unwrap_or_else(|_| "/workspace".to_string());
        let executor_port: u16 = std::env::var("EXECUTOR_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8900);
        let disable_bwrap = std::env::var("DISABLE_BWRAP")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(cfg!(debug_assertions));
        let container_id = std::env::var("CONTAINER_ID").unwrap_or_else(|_| detect_hostname());

        Ok(Self {
            session_id,
            control_plane_url,
            internal_api_token,
            workspace_path,
            executor_port,
            disable_bwrap,
            container_id,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name))
}

fn detect_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
