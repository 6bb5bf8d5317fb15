//! In-memory mock adapter for tests, adapted from the teacher's `MockRunner`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::BackendError;
use crate::port::{Backend, ContainerSpec, ContainerState, ContainerStatus, NodeCandidate};
use crate::Result;

#[derive(Debug, Clone)]
struct MockContainer {
    state: ContainerState,
    node_id: String,
    exit_code: Option<i32>,
}

/// Configurable in-memory backend. Use [`MockBackend::failing`] to make
/// `create_container` always fail, or [`MockBackend::kill`] to simulate a
/// container crashing out of band (drives the reconciler tests).
pub struct MockBackend {
    containers: Mutex<HashMap<String, MockContainer>>,
    fail_create: bool,
    node_id: String,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            fail_create: false,
            node_id: "mock-node-0".to_string(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }

    /// Simulate the container exiting out of band (crash, OOM, external delete).
    pub fn kill(&self, container_id: &str, exit_code: i32) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(container_id) {
            c.state = ContainerState::Exited;
            c.exit_code = Some(exit_code);
        }
    }

    /// Remove a container entirely, as if it had been garbage collected
    /// out of band (distinct from `Exited`, which is still listable).
    pub fn vanish(&self, container_id: &str) {
        self.containers.lock().unwrap().remove(container_id);
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn list_nodes(&self) -> Result<Vec<NodeCandidate>> {
        Ok(vec![NodeCandidate {
            node_id: self.node_id.clone(),
            has_image_cached: true,
            free_cpu_cores: 8.0,
            free_memory_bytes: 16 << 30,
            current_session_count: self.containers.lock().unwrap().len() as u32,
        }])
    }

    async fn create_container(&self, node_id: &str, spec: &ContainerSpec) -> Result<String> {
        if self.fail_create {
            return Err(BackendError::ImagePull(format!(
                "mock failure pulling {}",
                spec.image
            )));
        }
        let container_id = format!("mock-{}", spec.session_id);
        self.containers.lock().unwrap().insert(
            container_id.clone(),
            MockContainer {
                state: ContainerState::Running,
                node_id: node_id.to_string(),
                exit_code: None,
            },
        );
        Ok(container_id)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus> {
        let containers = self.containers.lock().unwrap();
        let c = containers
            .get(container_id)
            .ok_or_else(|| BackendError::ContainerNotFound(container_id.to_string()))?;
        Ok(ContainerStatus {
            state: c.state,
            node_id: Some(c.node_id.clone()),
            started_at: Some(Utc::now()),
            exit_code: c.exit_code,
        })
    }

    async fn stop(&self, container_id: &str, _grace_seconds: u32) -> Result<()> {
        if let Some(c) = self.containers.lock().unwrap().get_mut(container_id) {
            c.state = ContainerState::Exited;
            c.exit_code.get_or_insert(0);
        }
        Ok(())
    }

    async fn delete(&self, container_id: &str, _force: bool) -> Result<()> {
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }

    async fn list_sandbox_containers(&self) -> Result<Vec<String>> {
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }

    async fn fetch_logs(&self, _container_id: &str, _tail_lines: u32) -> Result<String> {
        Ok(String::new())
    }

    async fn upload_into(&self, _container_id: &str, _path: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn download_from(&self, _container_id: &str, _path: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_core::model::ResourceLimit;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            session_id: "s1".to_string(),
            image: "sandbox-template-python-basic:latest".to_string(),
            limits: ResourceLimit {
                cpu_cores: 1.0,
                memory_bytes: 512 << 20,
                disk_bytes: 1 << 30,
                max_processes: None,
            },
            env: HashMap::new(),
            mounts: vec![],
            network_mode: "none".to_string(),
            sandbox_label: "sandbox=true".to_string(),
            uid: 1000,
            gid: 1000,
        }
    }

    #[tokio::test]
    async fn create_then_inspect_reports_running() {
        let backend = MockBackend::new();
        let id = backend.create_container("mock-node-0", &spec()).await.unwrap();
        let status = backend.inspect(&id).await.unwrap();
        assert_eq!(status.state, ContainerState::Running);
    }

    #[tokio::test]
    async fn failing_backend_reports_image_pull_error() {
        let backend = MockBackend::failing();
        let err = backend
            .create_container("mock-node-0", &spec())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ImagePull(_)));
    }

    #[tokio::test]
    async fn kill_marks_container_exited_for_reconciler_to_find() {
        let backend = MockBackend::new();
        let id = backend.create_container("mock-node-0", &spec()).await.unwrap();
        backend.kill(&id, 137);
        let status = backend.inspect(&id).await.unwrap();
        assert_eq!(status.state, ContainerState::Exited);
        assert_eq!(status.exit_code, Some(137));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MockBackend::new();
        let id = backend.create_container("mock-node-0", &spec()).await.unwrap();
        backend.delete(&id, false).await.unwrap();
        backend.delete(&id, false).await.unwrap();
        assert!(backend.list_sandbox_containers().await.unwrap().is_empty());
    }
}
