//! `/sessions` — create, list, inspect, cancel (spec.md §6.1).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use sandbox_control::scheduler::SessionDraft;
use sandbox_core::ids::{SessionId, TemplateId};
use sandbox_core::model::{ResourceLimit, Session, SessionMode, SessionStatus};
use sandbox_store::session_store::SessionFilter;

use crate::error::ErrorContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub template_id: String,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub resource_limit: Option<ResourceLimit>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u32>,
}

pub async fn create_session(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let template_id = TemplateId::from(body.template_id);
    let template = match state.runtime.templates().get(&template_id).await {
        Ok(t) => t,
        Err(e) => return Err(ctx.wrap(e)),
    };

    let draft = SessionDraft {
        template,
        mode: body.mode.unwrap_or(SessionMode::Ephemeral),
        requested_limit: body.resource_limit,
        env: body.env,
        timeout_secs: body.timeout_secs,
    };

    let session = state
        .runtime
        .scheduler()
        .schedule(draft, &state.config.internal_api_token)
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<SessionStatus>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
}

pub async fn list_sessions(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Query(q): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let filter = SessionFilter {
        status: q.status,
        template_id: q.template_id.map(TemplateId::from),
        limit: q.limit.unwrap_or(0),
        offset: q.offset.unwrap_or(0),
    };

    let sessions = state
        .runtime
        .sessions()
        .list(&filter)
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(Json(SessionListResponse { sessions }))
}

pub async fn get_session(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    let session = state
        .runtime
        .sessions()
        .get(SessionId(id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(Json(session))
}

/// Cancellation (spec.md §5): idempotent. An already-terminal session is a
/// 200 no-op; otherwise the session is transitioned to `TERMINATED`
/// immediately and the backend teardown happens in the background so the
/// caller isn't blocked on container deletion.
pub async fn delete_session(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    let session_id = SessionId(id);
    let session = state
        .runtime
        .sessions()
        .get(session_id)
        .await
        .map_err(|e| ctx.wrap(e))?;

    if session.status.is_terminal() {
        return Ok::<_, crate::error::ApiError>(StatusCode::OK);
    }

    let transitioned = state
        .runtime
        .sessions()
        .transition(session_id, SessionStatus::Terminated, |s| {
            s.completed_at = Some(chrono::Utc::now());
        })
        .await;

    let container_id = match transitioned {
        Ok(s) => s.container_id,
        // A racing caller already flipped this session to a terminal state
        // between our read and our transition attempt — idempotent success.
        Err(sandbox_store::StoreError::Conflict(_)) => return Ok(StatusCode::OK),
        Err(e) => return Err(ctx.wrap(e)),
    };

    if let Some(container_id) = container_id {
        let backend = Arc::clone(state.runtime.backend());
        tokio::spawn(async move {
            let _ = backend.stop(&container_id, 10).await;
            let _ = backend.delete(&container_id, false).await;
        });
    }

    Ok(StatusCode::ACCEPTED)
}
