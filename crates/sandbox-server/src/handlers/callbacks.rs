//! Internal executor → control-plane callback API (spec.md §6.2). Every
//! route here sits behind [`crate::middleware::require_internal_token`].

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use sandbox_core::ids::{ExecutionId, SessionId};
use sandbox_core::model::{ArtifactMetadata, ExecutionMetrics, ExecutionStatus};

use crate::error::ErrorContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ContainerReadyRequest {
    pub session_id: uuid::Uuid,
}

/// Wakes the scheduler's readiness wait for this session (spec.md §4.2 step 4).
pub async fn container_ready(
    State(state): State<AppState>,
    Json(body): Json<ContainerReadyRequest>,
) -> impl IntoResponse {
    state
        .runtime
        .readiness()
        .notify_ready(SessionId(body.session_id));
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct ContainerExitedRequest {
    pub container_id: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub exit_reason: Option<String>,
}

/// The executor is reporting its own container is shutting down (SIGTERM
/// handling or a crash it could still phone home about). Transition the
/// session to a terminal state if it isn't already there.
pub async fn container_exited(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Json(body): Json<ContainerExitedRequest>,
) -> impl IntoResponse {
    let session = state
        .runtime
        .sessions()
        .find_by_container_id(&body.container_id)
        .await
        .map_err(|e| ctx.wrap(e))?;
    let session_id = session.id;

    if session.status.is_terminal() {
        return Ok::<_, crate::error::ApiError>(StatusCode::NO_CONTENT);
    }

    let next = if body.exit_code.unwrap_or(1) == 0 {
        sandbox_core::model::SessionStatus::Completed
    } else {
        sandbox_core::model::SessionStatus::Failed
    };

    state
        .runtime
        .sessions()
        .transition(session_id, next, |s| {
            s.completed_at = Some(chrono::Utc::now());
        })
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ExecutionResultRequest {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactMetadata>,
    #[serde(default)]
    pub metrics: Option<ExecutionMetrics>,
    #[serde(default)]
    pub return_value: Option<serde_json::Value>,
}

/// Terminal execution callback. Idempotent: the store's compare-and-set on
/// `status = RUNNING` makes a duplicate delivery (the executor's retry loop,
/// spec.md §4.5) a no-op after the first one lands.
pub async fn execution_result(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(execution_id): Path<uuid::Uuid>,
    Json(body): Json<ExecutionResultRequest>,
) -> impl IntoResponse {
    let stdout = body.stdout.map(|s| sandbox_core::model::truncate_stream(&s));
    let stderr = body.stderr.map(|s| sandbox_core::model::truncate_stream(&s));

    state
        .runtime
        .executions()
        .complete(
            ExecutionId(execution_id),
            body.status,
            body.exit_code,
            body.error_message,
            stdout,
            stderr,
            body.artifacts,
            body.metrics,
            body.return_value,
        )
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub session_id: uuid::Uuid,
}

pub async fn heartbeat(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Json(body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    state
        .runtime
        .sessions()
        .record_heartbeat(SessionId(body.session_id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(StatusCode::NO_CONTENT)
}
