//! Local Docker Engine adapter, built on `bollard`.

use async_trait::async_trait;
use bollard::container::{
    Config as DockerConfig, CreateContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;

use crate::error::BackendError;
use crate::port::{
    Backend, ContainerSpec, ContainerState, ContainerStatus, NodeCandidate,
};
use crate::Result;

/// Label key the scheduler uses to find containers it created, per
/// spec.md §4.3 ("filtered by a label the adapter sets on creation").
pub const SANDBOX_LABEL_KEY: &str = "sandbox.control-plane/managed";

/// A single local Docker daemon, treated as the sole "node" for this adapter.
pub struct DockerBackend {
    client: Docker,
    node_id: String,
}

impl DockerBackend {
    pub fn connect_with_defaults() -> Result<Self> {
        let client =
            Docker::connect_with_local_defaults().map_err(BackendError::Docker)?;
        Ok(Self {
            client,
            node_id: "local".to_string(),
        })
    }

    fn to_docker_state(state: Option<String>) -> ContainerState {
        match state.as_deref() {
            Some("running") => ContainerState::Running,
            Some("created") => ContainerState::Created,
            Some("exited") | Some("dead") => ContainerState::Exited,
            _ => ContainerState::Unknown,
        }
    }
}

#[async_trait]
impl Backend for DockerBackend {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    async fn list_nodes(&self) -> Result<Vec<NodeCandidate>> {
        let info = self.client.info().await.map_err(BackendError::Docker)?;
        let current = self.list_sandbox_containers().await?.len() as u32;
        Ok(vec![NodeCandidate {
            node_id: self.node_id.clone(),
            has_image_cached: true,
            free_cpu_cores: info.ncpu.unwrap_or(1) as f64,
            free_memory_bytes: info.mem_total.unwrap_or(0) as u64,
            current_session_count: current,
        }])
    }

    async fn create_container(&self, _node_id: &str, spec: &ContainerSpec) -> Result<String> {
        let mut labels = HashMap::new();
        labels.insert(SANDBOX_LABEL_KEY.to_string(), spec.sandbox_label.clone());

        let binds: Vec<String> = spec
            .mounts
            .iter()
            .map(|m| {
                format!(
                    "{}:{}{}",
                    m.host_path,
                    m.container_path,
                    if m.read_only { ":ro" } else { "" }
                )
            })
            .collect();

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            binds: Some(binds),
            memory: Some(spec.limits.memory_bytes as i64),
            nano_cpus: Some((spec.limits.cpu_cores * 1_000_000_000.0) as i64),
            network_mode: Some(spec.network_mode.clone()),
            cap_drop: Some(vec!["ALL".to_string()]),
            pids_limit: spec.limits.max_processes.map(|p| p as i64),
            port_bindings: Some(HashMap::<String, Option<Vec<PortBinding>>>::new()),
            ..Default::default()
        };

        let config = DockerConfig {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            user: Some(format!("{}:{}", spec.uid, spec.gid)),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: format!("sandbox-{}", spec.session_id),
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(BackendError::Docker)?;

        self.client
            .start_container::<String>(&created.id, None)
            .await
            .map_err(BackendError::Docker)?;

        Ok(created.id)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus> {
        let details = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => BackendError::ContainerNotFound(container_id.to_string()),
                other => BackendError::Docker(other),
            })?;

        let state = details.state.as_ref();
        let started_at = state
            .and_then(|s| s.started_at.as_ref())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(ContainerStatus {
            state: Self::to_docker_state(state.and_then(|s| s.status.as_ref()).map(|s| s.to_string())),
            node_id: Some(self.node_id.clone()),
            started_at,
            exit_code: state.and_then(|s| s.exit_code).map(|c| c as i32),
        })
    }

    async fn stop(&self, container_id: &str, grace_seconds: u32) -> Result<()> {
        self.client
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: grace_seconds as i64,
                }),
            )
            .await
            .map_err(BackendError::Docker)?;
        Ok(())
    }

    async fn delete(&self, container_id: &str, force: bool) -> Result<()> {
        let result = self
            .client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(BackendError::Docker(e)),
        }
    }

    async fn list_sandbox_containers(&self) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![SANDBOX_LABEL_KEY.to_string()]);

        let containers = self
            .client
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(BackendError::Docker)?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn fetch_logs(&self, container_id: &str, tail_lines: u32) -> Result<String> {
        let mut stream = self.client.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: tail_lines.to_string(),
                ..Default::default()
            }),
        );

        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(BackendError::Docker)?;
            out.push_str(&chunk.to_string());
        }
        Ok(out)
    }

    async fn upload_into(&self, _container_id: &str, _path: &str, _bytes: &[u8]) -> Result<()> {
        // Not needed for local adapter: the workspace is bind-mounted directly
        // (see ContainerSpec::mounts), so writes hit the host path instead.
        Err(BackendError::Other(
            "upload_into is unsupported by the local backend; use the bind-mounted workspace path"
                .to_string(),
        ))
    }

    async fn download_from(&self, _container_id: &str, _path: &str) -> Result<Vec<u8>> {
        Err(BackendError::Other(
            "download_from is unsupported by the local backend; use the bind-mounted workspace path"
                .to_string(),
        ))
    }
}
