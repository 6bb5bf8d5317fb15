//! Cluster orchestrator adapter: each sandbox is a single-container Pod on
//! a Kubernetes cluster, created and torn down via the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;

use crate::error::BackendError;
use crate::port::{
    Backend, ContainerSpec, ContainerState, ContainerStatus, NodeCandidate,
};
use crate::Result;

/// Label key the scheduler uses to find pods it created.
pub const SANDBOX_LABEL_KEY: &str = "sandbox.control-plane/managed";

pub struct ClusterBackend {
    client: Client,
    namespace: String,
}

impl ClusterBackend {
    pub async fn connect(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| BackendError::Other(format!("kube client init failed: {e}")))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pod_name(spec: &ContainerSpec) -> String {
        format!("sandbox-{}", spec.session_id)
    }

    fn build_pod(spec: &ContainerSpec) -> Pod {
        let env: Vec<EnvVar> = spec
            .env
            .iter()
            .map(|(k, v)| EnvVar {
                name: k.clone(),
                value: Some(v.clone()),
                ..Default::default()
            })
            .collect();

        let mut requests = BTreeMap::new();
        requests.insert(
            "memory".to_string(),
            Quantity(spec.limits.memory_bytes.to_string()),
        );
        requests.insert(
            "cpu".to_string(),
            Quantity(format!("{}", spec.limits.cpu_cores)),
        );

        let volumes: Vec<Volume> = spec
            .mounts
            .iter()
            .enumerate()
            .map(|(i, _)| Volume {
                name: format!("mount-{i}"),
                empty_dir: Some(Default::default()),
                ..Default::default()
            })
            .collect();

        let volume_mounts: Vec<VolumeMount> = spec
            .mounts
            .iter()
            .enumerate()
            .map(|(i, m)| VolumeMount {
                name: format!("mount-{i}"),
                mount_path: m.container_path.clone(),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let mut labels = BTreeMap::new();
        labels.insert(SANDBOX_LABEL_KEY.to_string(), spec.sandbox_label.clone());

        Pod {
            metadata: ObjectMeta {
                name: Some(Self::pod_name(spec)),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "executor".to_string(),
                    image: Some(spec.image.clone()),
                    env: Some(env),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    security_context: Some(SecurityContext {
                        run_as_user: Some(spec.uid as i64),
                        run_as_group: Some(spec.gid as i64),
                        capabilities: Some(k8s_openapi::api::core::v1::Capabilities {
                            drop: Some(vec!["ALL".to_string()]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    volume_mounts: Some(volume_mounts),
                    ..Default::default()
                }],
                volumes: Some(volumes),
                restart_policy: Some("Never".to_string()),
                host_network: Some(spec.network_mode == "host"),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Backend for ClusterBackend {
    fn backend_type(&self) -> &'static str {
        "cluster"
    }

    async fn list_nodes(&self) -> Result<Vec<NodeCandidate>> {
        // A single logical "node": the cluster itself. Bin-packing across
        // physical nodes is delegated to the Kubernetes scheduler.
        let current = self.list_sandbox_containers().await?.len() as u32;
        Ok(vec![NodeCandidate {
            node_id: "cluster".to_string(),
            has_image_cached: false,
            free_cpu_cores: f64::MAX,
            free_memory_bytes: u64::MAX,
            current_session_count: current,
        }])
    }

    async fn create_container(&self, _node_id: &str, spec: &ContainerSpec) -> Result<String> {
        let pod = Self::build_pod(spec);
        let created = self
            .pods()
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| BackendError::Other(format!("pod create failed: {e}")))?;
        Ok(created.metadata.name.unwrap_or_else(|| Self::pod_name(spec)))
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus> {
        let pod = self
            .pods()
            .get(container_id)
            .await
            .map_err(|_| BackendError::ContainerNotFound(container_id.to_string()))?;

        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default();

        let state = match phase.as_str() {
            "Running" => ContainerState::Running,
            "Pending" => ContainerState::Created,
            "Succeeded" | "Failed" => ContainerState::Exited,
            _ => ContainerState::Unknown,
        };

        let exit_code = pod.status.as_ref().and_then(|s| {
            s.container_statuses
                .as_ref()
                .and_then(|cs| cs.first())
                .and_then(|c| c.state.as_ref())
                .and_then(|st| st.terminated.as_ref())
                .map(|t| t.exit_code)
        });

        Ok(ContainerStatus {
            state,
            node_id: Some("cluster".to_string()),
            started_at: None,
            exit_code,
        })
    }

    async fn stop(&self, container_id: &str, grace_seconds: u32) -> Result<()> {
        let params = DeleteParams {
            grace_period_seconds: Some(grace_seconds),
            ..Default::default()
        };
        let _ = self.pods().delete(container_id, &params).await;
        Ok(())
    }

    async fn delete(&self, container_id: &str, force: bool) -> Result<()> {
        let params = if force {
            DeleteParams {
                grace_period_seconds: Some(0),
                ..Default::default()
            }
        } else {
            DeleteParams::default()
        };
        match self.pods().delete(container_id, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(BackendError::Other(format!("pod delete failed: {e}"))),
        }
    }

    async fn list_sandbox_containers(&self) -> Result<Vec<String>> {
        let list = self
            .pods()
            .list(&ListParams::default().labels(SANDBOX_LABEL_KEY))
            .await
            .map_err(|e| BackendError::Other(format!("pod list failed: {e}")))?;
        Ok(list
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }

    async fn fetch_logs(&self, container_id: &str, tail_lines: u32) -> Result<String> {
        self.pods()
            .logs(
                container_id,
                &LogParams {
                    tail_lines: Some(tail_lines as i64),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BackendError::Other(format!("pod logs failed: {e}")))
    }

    async fn upload_into(&self, _container_id: &str, _path: &str, _bytes: &[u8]) -> Result<()> {
        Err(BackendError::Other(
            "upload_into is not implemented for the cluster backend; use an object-store workspace mount"
                .to_string(),
        ))
    }

    async fn download_from(&self, _container_id: &str, _path: &str) -> Result<Vec<u8>> {
        Err(BackendError::Other(
            "download_from is not implemented for the cluster backend; use an object-store workspace mount"
                .to_string(),
        ))
    }
}
