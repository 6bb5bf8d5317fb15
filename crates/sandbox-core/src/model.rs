//! Core entities: [`Template`], [`ResourceLimit`], [`Session`], [`Execution`],
//! [`ArtifactMetadata`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ExecutionId, SessionId, TemplateId};

/// A blueprint for a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub image: String,
    pub runtime_kind: String,
    pub default_limits: ResourceLimit,
    pub default_timeout_secs: u32,
    pub default_env: std::collections::HashMap<String, String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// `default timeout in range` invariant from spec.md §3.
    pub fn validate(&self) -> crate::Result<()> {
        if self.image.trim().is_empty() {
            return Err(crate::Error::InvalidRequest(
                "template image reference must not be empty".into(),
            ));
        }
        if !(1..=3600).contains(&self.default_timeout_secs) {
            return Err(crate::Error::InvalidRequest(
                "template default timeout must be within 1..=3600 seconds".into(),
            ));
        }
        Ok(())
    }
}

/// Resource limit value object. Immutable once attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimit {
    /// CPU cores, expressed as a rational number of cores (e.g. 0.5, 2.0).
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub max_processes: Option<u32>,
}

impl ResourceLimit {
    /// True if `self` is within the bounds of `template_default`.
    pub fn within(&self, bound: &ResourceLimit) -> bool {
        self.cpu_cores <= bound.cpu_cores
            && self.memory_bytes <= bound.memory_bytes
            && self.disk_bytes <= bound.disk_bytes
    }
}

/// Scheduling mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Ephemeral,
    Persistent,
}

/// Session lifecycle state, per spec.md §4.1. Canonical uppercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Creating,
    Starting,
    Running,
    Completed,
    Terminated,
    Failed,
    Timeout,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Terminated
                | SessionStatus::Failed
                | SessionStatus::Timeout
        )
    }

    /// Valid direct transitions per the state diagram in spec.md §4.1.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Creating)
                | (Creating, Starting)
                | (Creating, Failed)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Completed)
                | (Running, Terminated)
                | (Running, Failed)
                | (Running, Timeout)
        )
    }
}

/// A provisioned sandbox, 1:1 with a backend container over its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub template_id: TemplateId,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub resource_limit: ResourceLimit,
    pub workspace_path: String,
    pub runtime_kind: String,
    pub runtime_node_id: Option<String>,
    pub container_id: Option<String>,
    pub pod_name: Option<String>,
    pub env: std::collections::HashMap<String, String>,
    pub timeout_secs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// `container_id` non-empty once status >= CREATING.
    pub fn container_id_required(&self) -> bool {
        !matches!(self.status, SessionStatus::Pending)
    }
}

/// Status of one code submission against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Crashed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// Resource/timing metrics captured for one execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub duration_ms: u64,
    pub cpu_time_ms: Option<u64>,
    pub peak_memory_mb: Option<u64>,
}

/// `{path, size_bytes, mime_type, kind, created_at, checksum?}` — non-hidden
/// files discovered in the workspace after an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub path: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub checksum: Option<String>,
}

/// One code run inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub session_id: SessionId,
    pub status: ExecutionStatus,
    pub code: String,
    pub language: String,
    pub timeout_secs: u32,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub artifacts: Vec<ArtifactMetadata>,
    pub metrics: Option<ExecutionMetrics>,
    pub return_value: Option<serde_json::Value>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Language whitelist from spec.md §4.4.
pub const ALLOWED_LANGUAGES: &[&str] = &["python", "javascript", "shell"];

/// 1 MiB code size cap from spec.md §3.
pub const MAX_CODE_BYTES: usize = 1 << 20;

/// 10 MiB stdout/stderr cap from spec.md §3.
pub const MAX_STREAM_BYTES: usize = 10 << 20;

/// Truncation marker appended when a stream is clipped at [`MAX_STREAM_BYTES`].
pub const TRUNCATION_MARKER: &str = "\n…[truncated]";

/// Truncate `s` to at most [`MAX_STREAM_BYTES`], appending the marker if clipped.
pub fn truncate_stream(s: &str) -> String {
    if s.len() <= MAX_STREAM_BYTES {
        return s.to_string();
    }
    let mut end = MAX_STREAM_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], TRUNCATION_MARKER)
}
