//! `/executions` — submit code, poll status/result (spec.md §6.1, §4.4).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use sandbox_core::ids::{ExecutionId, SessionId};
use sandbox_core::model::{Execution, ExecutionStatus};

use crate::error::ErrorContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    #[serde(default)]
    pub event: Option<serde_json::Value>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteAccepted {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
}

pub async fn execute(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(session_id): Path<uuid::Uuid>,
    Json(body): Json<ExecuteRequest>,
) -> impl IntoResponse {
    let session_id = SessionId(session_id);
    let timeout_secs = match body.timeout_secs {
        Some(t) => t,
        None => state
            .runtime
            .sessions()
            .get(session_id)
            .await
            .map_err(|e| ctx.wrap(e))?
            .timeout_secs,
    };

    let execution = state
        .runtime
        .dispatch()
        .submit(
            session_id,
            body.code,
            body.language,
            timeout_secs,
            body.event.unwrap_or(serde_json::Value::Null),
            body.env_vars,
        )
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>((
        StatusCode::ACCEPTED,
        Json(ExecuteAccepted {
            execution_id: execution.id,
            status: execution.status,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct ExecutionStatusResponse {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
}

pub async fn get_status(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(execution_id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    let execution = state
        .runtime
        .executions()
        .get(ExecutionId(execution_id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(Json(ExecutionStatusResponse {
        execution_id: execution.id,
        status: execution.status,
        exit_code: execution.exit_code,
    }))
}

pub async fn get_result(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(execution_id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    let execution = state
        .runtime
        .executions()
        .get(ExecutionId(execution_id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(Json(execution))
}

#[derive(Debug, Serialize)]
pub struct ExecutionListResponse {
    pub executions: Vec<Execution>,
}

pub async fn list_for_session(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(session_id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    let executions = state
        .runtime
        .executions()
        .list_for_session(SessionId(session_id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(Json(ExecutionListResponse { executions }))
}
