//! HTTP client back to the control plane's internal callback API
//! (spec.md §6.2), with bounded exponential backoff and a last-resort
//! on-disk fallback so a terminal result is never silently lost.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use sandbox_core::ids::{ExecutionId, SessionId};
use sandbox_core::model::{ArtifactMetadata, ExecutionMetrics, ExecutionStatus};

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct CallbackClient {
    http: reqwest::Client,
    base_url: String,
    internal_api_token: String,
}

#[derive(Serialize)]
struct ContainerReadyBody<'a> {
    session_id: SessionId,
    container_id: &'a str,
    executor_port: u16,
    ready_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct HeartbeatBody {
    session_id: SessionId,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct ExecutionResultBody {
    status: ExecutionStatus,
    exit_code: Option<i32>,
    error_message: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    artifacts: Vec<ArtifactMetadata>,
    metrics: Option<ExecutionMetrics>,
    return_value: Option<Value>,
}

impl CallbackClient {
    pub fn new(base_url: String, internal_api_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            internal_api_token,
        }
    }

    pub async fn container_ready(&self, session_id: SessionId, container_id: &str, executor_port: u16) {
        let body = ContainerReadyBody {
            session_id,
            container_id,
            executor_port,
            ready_at: chrono::Utc::now(),
        };
        self.post_with_retry("/internal/containers/ready", &body, None)
            .await;
    }

    pub async fn container_exited(&self, container_id: &str, exit_code: i32, exit_reason: &str) {
        let body = serde_json::json!({
            "container_id": container_id,
            "exit_code": exit_code,
            "exit_reason": exit_reason,
            "exited_at": chrono::Utc::now(),
        });
        self.post_with_retry("/internal/containers/exited", &body, None)
            .await;
    }

    pub async fn heartbeat(&self, session_id: SessionId) {
        let body = HeartbeatBody {
            session_id,
            timestamp: chrono::Utc::now(),
        };
        self.post_with_retry("/internal/executions/heartbeat", &body, None)
            .await;
    }

    /// Terminal callback. Falls back to `/tmp/results/{execution_id}.json`
    /// if every retry is exhausted, so a finished execution is never lost
    /// even if the control plane is unreachable (spec.md §4.5).
    #[allow(clippy::too_many_arguments)]
    pub async fn execution_result(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        exit_code: Option<i32>,
        error_message: Option<String>,
        stdout: Option<String>,
        stderr: Option<String>,
        artifacts: Vec<ArtifactMetadata>,
        metrics: Option<ExecutionMetrics>,
        return_value: Option<Value>,
    ) {
        let body = ExecutionResultBody {
            status,
            exit_code,
            error_message,
            stdout,
            stderr,
            artifacts,
            metrics,
            return_value,
        };
        let path = format!("/internal/executions/{execution_id}/result");

        if self.post_with_retry(&path, &body, Some(1)).await {
            return;
        }

        if let Ok(json) = serde_json::to_vec_pretty(&body) {
            let dir = Path::new("/tmp/results");
            if std::fs::create_dir_all(dir).is_ok() {
                let file = dir.join(format!("{execution_id}.json"));
                if let Err(e) = std::fs::write(&file, json) {
                    error!(%execution_id, error = %e, "failed to persist result fallback");
                } else {
                    warn!(%execution_id, path = %file.display(), "callback exhausted, persisted result to disk");
                }
            }
        }
    }

    /// Returns true on success. `attempt_header` seeds the `attempt` header
    /// sent with each try (monotonic across retries when provided).
    async fn post_with_retry(
        &self,
        path: &str,
        body: &impl Serialize,
        attempt_header: Option<u32>,
    ) -> bool {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            let mut req = self
                .http
                .post(&url)
                .bearer_auth(&self.internal_api_token)
                .json(body);
            if let Some(base) = attempt_header {
                req = req.header("attempt", (base + attempt - 1).to_string());
            } else {
                req = req.header("attempt", attempt.to_string());
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    warn!(%url, status = %resp.status(), attempt, "callback rejected");
                }
                Err(e) => {
                    warn!(%url, error = %e, attempt, "callback request failed");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
        false
    }
}
