//! `/execute` and `/health` — the executor's entire public surface
//! (spec.md §4.5 step 4, §6.4).

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::pipeline::{self, PipelineRequest};
use crate::state::{ExecuteRequest, ExecutorState};

#[derive(Serialize)]
pub struct ExecuteAccepted {
    execution_id: sandbox_core::ids::ExecutionId,
    status: &'static str,
}

pub async fn liveness(State(state): State<ExecutorState>) -> impl IntoResponse {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Accepts one execution at a time; a full backlog is rejected outright
/// rather than left to stall behind a running job (spec.md §5).
pub async fn execute(
    State(state): State<ExecutorState>,
    Json(body): Json<ExecuteRequest>,
) -> impl IntoResponse {
    let execution_id = body.execution_id;
    let workspace = pipeline::workspace_path(&state.config.workspace_path);
    let timeout = Duration::from_secs(body.timeout as u64);
    let active = state.active.clone();
    let callback = state.callback.clone();
    let disable_bwrap = state.config.disable_bwrap;
    let session_id = state.config.session_id;
    let env_vars = body.env_vars;

    let job = async move {
        {
            let mut slot = active.lock().await;
            *slot = Some(execution_id);
        }

        let heartbeat_handle = spawn_heartbeat(callback.clone(), session_id);

        let outcome = pipeline::run(PipelineRequest {
            workspace: &workspace,
            language: &body.language,
            code: &body.code,
            event: body.event,
            timeout,
            disable_bwrap,
            env_vars: &env_vars,
        })
        .await;

        heartbeat_handle.abort();

        callback
            .execution_result(
                execution_id,
                outcome.status,
                outcome.exit_code,
                outcome.error_message,
                Some(outcome.stdout),
                Some(outcome.stderr),
                outcome.artifacts,
                Some(outcome.metrics),
                outcome.return_value,
            )
            .await;

        {
            let mut slot = active.lock().await;
            *slot = None;
        }
    };

    if state.queue.try_enqueue(job) {
        (
            StatusCode::ACCEPTED,
            Json(ExecuteAccepted {
                execution_id,
                status: "running",
            }),
        )
            .into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

fn spawn_heartbeat(
    callback: std::sync::Arc<crate::callback::CallbackClient>,
    session_id: sandbox_core::ids::SessionId,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            callback.heartbeat(session_id).await;
        }
    })
}
