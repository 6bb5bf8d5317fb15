//! Shared executor state: the single active execution slot, the backlog
//! queue, and the callback client used to phone results home.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use sandbox_core::ids::{ExecutionId, SessionId};

use crate::callback::CallbackClient;
use crate::config::ExecutorConfig;
use crate::queue::ExecutionQueue;

#[derive(Clone)]
pub struct ExecutorState {
    pub config: Arc<ExecutorConfig>,
    pub queue: ExecutionQueue,
    pub callback: Arc<CallbackClient>,
    /// The execution currently running, if any — read by the SIGTERM
    /// handler so it can report `CRASHED` for work in flight.
    pub active: Arc<Mutex<Option<ExecutionId>>>,
    pub ready: Arc<AtomicBool>,
}

impl ExecutorState {
    pub fn new(config: ExecutorConfig) -> Self {
        let callback = CallbackClient::new(config.control_plane_url.clone(), config.internal_api_token.clone());
        Self {
            config: Arc::new(config),
            queue: ExecutionQueue::start(),
            callback: Arc::new(callback),
            active: Arc::new(Mutex::new(None)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }
}

/// Body the dispatch engine POSTs to `/execute` (mirrors the control
/// plane's `ExecuteRequest`).
#[derive(Debug, serde::Deserialize)]
pub struct ExecuteRequest {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub code: String,
    pub language: String,
    pub timeout: u32,
    pub event: serde_json::Value,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}
