//! Scheduler: picks a backend node, creates a container, and waits for the
//! executor to report readiness before a session is allowed into `RUNNING`.
//!
//! Grounded on the teacher's node/capacity reasoning in
//! `EnvironmentRuntimeBuilder`'s wiring of a single `Runner` into instance
//! launch, generalized to the multi-node template-affinity/load-balancing
//! preference order in spec.md §4.2.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::timeout;

use sandbox_backend::{Backend, ContainerSpec, MountSpec, NodeCandidate};
use sandbox_core::ids::SessionId;
use sandbox_core::model::{ResourceLimit, Session, SessionMode, SessionStatus, Template};
use sandbox_store::SessionStore;

use crate::error::{ControlError, Result};

/// Sandbox containers always run as this non-root uid:gid (spec.md §4.2 step 3).
pub const SANDBOX_UID: u32 = 1000;
pub const SANDBOX_GID: u32 = 1000;

/// Minimum bound on the readiness wait, configurable above this floor.
pub const MIN_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry of pending `container_ready` notifications keyed by session id,
/// so the scheduler's readiness wait can race a callback against a health
/// poll (spec.md §4.2 step 4) without the HTTP layer and the scheduler
/// sharing anything more than this map.
#[derive(Default, Clone)]
pub struct ReadinessRegistry {
    waiters: Arc<std::sync::Mutex<HashMap<SessionId, Arc<Notify>>>>,
}

impl ReadinessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiter_for(&self, session_id: SessionId) -> Arc<Notify> {
        let mut waiters = self.waiters.lock().unwrap();
        waiters
            .entry(session_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Called by the `/internal/containers/ready` handler.
    pub fn notify_ready(&self, session_id: SessionId) {
        self.waiter_for(session_id).notify_waiters();
    }
}

pub struct Scheduler {
    store: Arc<SessionStore>,
    backend: Arc<dyn Backend>,
    readiness: ReadinessRegistry,
    control_plane_url: String,
    workspace_root: String,
    readiness_timeout: Duration,
}

/// Everything the caller supplies to start a session, before scheduling.
pub struct SessionDraft {
    pub template: Template,
    pub mode: SessionMode,
    pub requested_limit: Option<ResourceLimit>,
    pub env: HashMap<String, String>,
    pub timeout_secs: Option<u32>,
}

impl Scheduler {
    pub fn new(
        store: Arc<SessionStore>,
        backend: Arc<dyn Backend>,
        readiness: ReadinessRegistry,
        control_plane_url: String,
        workspace_root: String,
        readiness_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            readiness,
            control_plane_url,
            workspace_root,
            readiness_timeout: readiness_timeout.max(MIN_READINESS_TIMEOUT),
        }
    }

    /// Run the full schedule-and-start pipeline for a new session (spec.md §4.2).
    pub async fn schedule(&self, draft: SessionDraft, internal_api_token: &str) -> Result<Session> {
        let limit = draft.requested_limit.unwrap_or(draft.template.default_limits);
        if !limit.within(&draft.template.default_limits) {
            return Err(ControlError::Domain(sandbox_core::Error::InvalidRequest(
                "requested resource limit exceeds template bounds".into(),
            )));
        }

        let session_id = SessionId::new();
        let workspace_path = format!("{}/{session_id}", self.workspace_root);
        let now = Utc::now();
        let session = Session {
            id: session_id,
            template_id: draft.template.id.clone(),
            mode: draft.mode,
            status: SessionStatus::Pending,
            resource_limit: limit,
            workspace_path: workspace_path.clone(),
            runtime_kind: draft.template.runtime_kind.clone(),
            runtime_node_id: None,
            container_id: None,
            pod_name: None,
            env: draft.env.clone(),
            timeout_secs: draft.timeout_secs.unwrap_or(draft.template.default_timeout_secs),
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_activity_at: now,
        };
        self.store.create(&session).await?;

        let node_id = self.pick_node(&draft.template.image).await?;

        self.store
            .transition(session_id, SessionStatus::Creating, |_| {})
            .await?;

        let mut env = draft.env;
        env.insert("SESSION_ID".to_string(), session_id.to_string());
        env.insert("CONTROL_PLANE_URL".to_string(), self.control_plane_url.clone());
        env.insert("INTERNAL_API_TOKEN".to_string(), internal_api_token.to_string());
        env.insert("WORKSPACE_PATH".to_string(), "/workspace".to_string());

        let spec = ContainerSpec {
            session_id: session_id.to_string(),
            image: draft.template.image.clone(),
            limits: limit,
            env,
            mounts: vec![MountSpec {
                host_path: workspace_path,
                container_path: "/workspace".to_string(),
                read_only: false,
            }],
            network_mode: "none".to_string(),
            sandbox_label: session_id.to_string(),
            uid: SANDBOX_UID,
            gid: SANDBOX_GID,
        };

        let container_id = match self.backend.create_container(&node_id, &spec).await {
            Ok(id) => id,
            Err(e) => {
                self.store
                    .transition(session_id, SessionStatus::Failed, |_| {})
                    .await
                    .ok();
                return Err(ControlError::Backend(e));
            }
        };

        self.store
            .transition(session_id, SessionStatus::Starting, |s| {
                s.runtime_node_id = Some(node_id.clone());
                s.container_id = Some(container_id.clone());
            })
            .await?;

        if let Err(e) = self.wait_for_readiness(session_id, &container_id).await {
            // Best-effort teardown; readiness timeout is a hard failure.
            let _ = self.backend.delete(&container_id, true).await;
            self.store
                .transition(session_id, SessionStatus::Failed, |_| {})
                .await
                .ok();
            return Err(e);
        }

        let session = self
            .store
            .transition(session_id, SessionStatus::Running, |_| {})
            .await?;

        tracing::info!(session_id = %session.id, node_id = %node_id, "session scheduled");
        Ok(session)
    }

    /// Template-affinity, then free-capacity, then cold-start; ties broken
    /// by lowest current session count (spec.md §4.2 step 2).
    async fn pick_node(&self, image: &str) -> Result<String> {
        let nodes = self.backend.list_nodes().await?;
        if nodes.is_empty() {
            return Err(ControlError::Domain(sandbox_core::Error::SchedulingFailed(
                "no backend nodes available".into(),
            )));
        }

        let best = nodes
            .iter()
            .filter(|n| n.has_image_cached)
            .min_by_key(|n| n.current_session_count)
            .or_else(|| {
                nodes
                    .iter()
                    .filter(|n| has_free_capacity(n))
                    .min_by_key(|n| n.current_session_count)
            })
            .or_else(|| nodes.iter().min_by_key(|n| n.current_session_count));

        best.map(|n| n.node_id.clone()).ok_or_else(|| {
            ControlError::Domain(sandbox_core::Error::SchedulingFailed(format!(
                "no node could accept image {image}"
            )))
        })
    }

    /// Races the `container_ready` callback against a coarse backend-level
    /// health proxy (the executor has no externally reachable address in
    /// this port, so `inspect` standing for "the container is at least up"
    /// is the fallback branch; the callback is still the expected winner).
    async fn wait_for_readiness(&self, session_id: SessionId, container_id: &str) -> Result<()> {
        let waiter = self.readiness.waiter_for(session_id);

        let race = async {
            tokio::select! {
                _ = waiter.notified() => {}
                _ = self.poll_until_running(container_id) => {}
            }
        };

        timeout(self.readiness_timeout, race).await.map_err(|_| {
            ControlError::Domain(sandbox_core::Error::SchedulingFailed(format!(
                "session {session_id} executor did not become ready in time"
            )))
        })
    }

    async fn poll_until_running(&self, container_id: &str) {
        loop {
            if let Ok(status) = self.backend.inspect(container_id).await {
                if status.state == sandbox_backend::ContainerState::Running {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

fn has_free_capacity(node: &NodeCandidate) -> bool {
    node.free_cpu_cores > 0.0 && node.free_memory_bytes > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_check_rejects_zero_free_resources() {
        let node = NodeCandidate {
            node_id: "n1".into(),
            has_image_cached: false,
            free_cpu_cores: 0.0,
            free_memory_bytes: 0,
            current_session_count: 0,
        };
        assert!(!has_free_capacity(&node));
    }
}
