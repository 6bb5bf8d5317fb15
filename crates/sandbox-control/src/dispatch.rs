//! Dispatch engine: forwards `execute` requests to the executor inside a
//! session's container, tracks the in-flight execution with a watchdog, and
//! persists the terminal result (spec.md §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sandbox_backend::Backend;
use sandbox_core::ids::{ExecutionId, SessionId};
use sandbox_core::model::{
    ArtifactMetadata, Execution, ExecutionMetrics, ExecutionStatus, Session, SessionMode,
    SessionStatus, ALLOWED_LANGUAGES, MAX_CODE_BYTES,
};
use sandbox_store::{ExecutionStore, SessionStore};

use crate::error::{ControlError, Result};

const WATCHDOG_GRACE: Duration = Duration::from_secs(10);

/// Body the dispatch engine POSTs to the executor's `/execute`.
#[derive(Debug, serde::Serialize)]
struct ExecuteRequest<'a> {
    execution_id: ExecutionId,
    session_id: SessionId,
    code: &'a str,
    language: &'a str,
    timeout: u32,
    event: serde_json::Value,
    env_vars: &'a HashMap<String, String>,
}

#[derive(Debug, serde::Deserialize)]
struct ExecuteAck {
    #[allow(dead_code)]
    execution_id: ExecutionId,
    #[allow(dead_code)]
    status: String,
}

pub struct DispatchEngine {
    sessions: Arc<SessionStore>,
    executions: Arc<ExecutionStore>,
    backend: Arc<dyn Backend>,
    http: reqwest::Client,
    internal_api_token: String,
    executor_port: u16,
}

impl DispatchEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        executions: Arc<ExecutionStore>,
        backend: Arc<dyn Backend>,
        internal_api_token: String,
        executor_port: u16,
    ) -> Self {
        Self {
            sessions,
            executions,
            backend,
            http: reqwest::Client::new(),
            internal_api_token,
            executor_port,
        }
    }

    /// Validate, create the PENDING execution, dispatch it to the executor,
    /// and start its watchdog in the background. Returns the PENDING
    /// execution immediately; the caller does not wait on the watchdog.
    pub async fn submit(
        &self,
        session_id: SessionId,
        code: String,
        language: String,
        timeout_secs: u32,
        event: serde_json::Value,
        env_vars: HashMap<String, String>,
    ) -> Result<Execution> {
        if code.len() > MAX_CODE_BYTES {
            return Err(ControlError::Domain(sandbox_core::Error::InvalidRequest(
                format!("code exceeds {MAX_CODE_BYTES} byte limit"),
            )));
        }
        if !ALLOWED_LANGUAGES.contains(&language.as_str()) {
            return Err(ControlError::Domain(sandbox_core::Error::InvalidRequest(
                format!("unsupported language {language}"),
            )));
        }

        let session = self.sessions.get(session_id).await?;
        if session.status != SessionStatus::Running {
            return Err(ControlError::Domain(sandbox_core::Error::Conflict(
                format!("session {session_id} is not RUNNING"),
            )));
        }

        if session.mode == SessionMode::Ephemeral {
            let active = self.executions.find_active_for_session(session_id).await?;
            if !active.is_empty() {
                return Err(ControlError::Domain(sandbox_core::Error::Conflict(
                    "an execution is already in flight for this ephemeral session".into(),
                )));
            }
        }

        let now = chrono::Utc::now();
        let execution = Execution {
            id: ExecutionId::new(),
            session_id,
            status: ExecutionStatus::Pending,
            code,
            language,
            timeout_secs,
            exit_code: None,
            error_message: None,
            stdout: None,
            stderr: None,
            artifacts: Vec::new(),
            metrics: None,
            return_value: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.executions.create(&execution).await?;
        self.sessions.touch_activity(session_id).await?;

        self.dispatch(&session, &execution, event, env_vars).await?;

        Ok(execution)
    }

    async fn dispatch(
        &self,
        session: &Session,
        execution: &Execution,
        event: serde_json::Value,
        env_vars: HashMap<String, String>,
    ) -> Result<()> {
        let container_id = session.container_id.clone().ok_or_else(|| {
            ControlError::Domain(sandbox_core::Error::Internal(
                "RUNNING session has no container_id".into(),
            ))
        })?;

        let url = self.executor_url(session, &container_id);
        let body = ExecuteRequest {
            execution_id: execution.id,
            session_id: session.id,
            code: &execution.code,
            language: &execution.language,
            timeout: execution.timeout_secs,
            event,
            env_vars: &env_vars,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.internal_api_token)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let _: ExecuteAck = resp.json().await.unwrap_or(ExecuteAck {
                    execution_id: execution.id,
                    status: "running".to_string(),
                });
                self.executions.mark_running(execution.id).await?;
                self.spawn_watchdog(execution.id, execution.timeout_secs);
                Ok(())
            }
            Ok(resp) => Err(ControlError::Domain(sandbox_core::Error::ExecutorUnreachable(
                format!("executor returned {}", resp.status()),
            ))),
            Err(e) => Err(ControlError::Executor(e)),
        }
    }

    fn executor_url(&self, session: &Session, container_id: &str) -> String {
        format!(
            "http://{}:{}/execute",
            session
                .runtime_node_id
                .clone()
                .unwrap_or_else(|| container_id.to_string()),
            self.executor_port
        )
    }

    /// Spawns a background watchdog: if no terminal callback lands by
    /// `timeout + grace`, probe the executor's health and mark the
    /// execution `CRASHED` or `TIMEOUT` accordingly (spec.md §4.4 step 7).
    fn spawn_watchdog(&self, execution_id: ExecutionId, timeout_secs: u32) {
        let executions = self.executions.clone();
        let sessions = self.sessions.clone();
        let backend = self.backend.clone();
        let deadline = Duration::from_secs(timeout_secs as u64) + WATCHDOG_GRACE;

        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;

            let execution = match executions.get(execution_id).await {
                Ok(e) => e,
                Err(_) => return,
            };
            if execution.status.is_terminal() {
                return;
            }

            let session = match sessions.get(execution.session_id).await {
                Ok(s) => s,
                Err(_) => return,
            };

            let reachable = match &session.container_id {
                Some(cid) => backend.inspect(cid).await.is_ok(),
                None => false,
            };

            let (status, message) = if reachable {
                (ExecutionStatus::Timeout, "watchdog: no callback before deadline".to_string())
            } else {
                (ExecutionStatus::Crashed, "watchdog: executor unreachable".to_string())
            };

            let _ = executions
                .complete(
                    execution_id,
                    status,
                    None,
                    Some(message),
                    None,
                    None,
                    Vec::<ArtifactMetadata>::new(),
                    None::<ExecutionMetrics>,
                    None,
                )
                .await;

            tracing::warn!(execution_id = %execution_id, ?status, "watchdog fired");
        });
    }
}
