//! The abstract port. See `sandbox_backend::docker` and
//! `sandbox_backend::cluster` for the two concrete implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sandbox_core::model::ResourceLimit;
use std::collections::HashMap;

use crate::Result;

/// A mount of a volume into the container's filesystem.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Everything the scheduler needs to ask the backend to create a container
/// for one session (spec.md §4.2 step 3).
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub session_id: String,
    pub image: String,
    pub limits: ResourceLimit,
    pub env: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    /// Network mode; `"none"` unless the template explicitly permits otherwise.
    pub network_mode: String,
    /// Label the adapter must set so `list_sandbox_containers` can filter by it.
    pub sandbox_label: String,
    pub uid: u32,
    pub gid: u32,
}

/// Observed lifecycle state of a backend container, independent of the
/// session state machine (which is the control plane's own source of truth).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

/// Result of `inspect`.
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub state: ContainerState,
    pub node_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

/// A backend node the scheduler can place a container on.
#[derive(Debug, Clone)]
pub struct NodeCandidate {
    pub node_id: String,
    pub has_image_cached: bool,
    pub free_cpu_cores: f64,
    pub free_memory_bytes: u64,
    pub current_session_count: u32,
}

/// The Backend Adapter Port (spec.md §4.3).
///
/// Implementations own all backend-specific concerns (sockets, API clients,
/// auth); everything above this trait is backend-agnostic.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Adapter identifier, e.g. `"local"`, `"cluster"`, `"mock"`.
    fn backend_type(&self) -> &'static str;

    /// Candidate nodes for scheduling, used by the template-affinity and
    /// load-balancing preference order in spec.md §4.2 step 2.
    async fn list_nodes(&self) -> Result<Vec<NodeCandidate>>;

    /// Create (and start) a container for `spec` on `node_id`. Returns the
    /// backend's container id.
    async fn create_container(&self, node_id: &str, spec: &ContainerSpec) -> Result<String>;

    /// Current observed state of a container.
    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus>;

    /// Stop a running container, giving it `grace_seconds` before a forced kill.
    async fn stop(&self, container_id: &str, grace_seconds: u32) -> Result<()>;

    /// Delete a container. Idempotent: deleting an already-gone container
    /// must not be treated as an error by callers (the adapter may still
    /// return `ContainerNotFound`, which reconciliation treats as success).
    async fn delete(&self, container_id: &str, force: bool) -> Result<()>;

    /// All containers the scheduler has created, identified by the sandbox
    /// label set at creation time. Used by startup state-sync (spec.md §4.6).
    async fn list_sandbox_containers(&self) -> Result<Vec<String>>;

    /// Tail of the container's combined log output.
    async fn fetch_logs(&self, container_id: &str, tail_lines: u32) -> Result<String>;

    /// Write `bytes` into the container's filesystem at `path`.
    async fn upload_into(&self, container_id: &str, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a file out of the container's filesystem.
    async fn download_from(&self, container_id: &str, path: &str) -> Result<Vec<u8>>;
}
