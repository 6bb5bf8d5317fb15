//! `/sessions/{id}/files` — push/pull files into a session's workspace
//! through the Backend Adapter Port (spec.md §4.3).

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use sandbox_core::ids::SessionId;
use sandbox_core::Error as DomainError;

use crate::error::ErrorContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub path: String,
}

pub async fn upload(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(session_id): Path<uuid::Uuid>,
    Query(q): Query<UploadQuery>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let session = state
        .runtime
        .sessions()
        .get(SessionId(session_id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    let container_id = session.container_id.clone().ok_or_else(|| {
        ctx.wrap(DomainError::Conflict(
            "session has no container yet".into(),
        ))
    })?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ctx.wrap(DomainError::InvalidRequest(e.to_string())))?
        .ok_or_else(|| ctx.wrap(DomainError::InvalidRequest("missing file field".into())))?;

    let bytes: Bytes = field
        .bytes()
        .await
        .map_err(|e| ctx.wrap(DomainError::InvalidRequest(e.to_string())))?;

    state
        .runtime
        .backend()
        .upload_into(&container_id, &q.path, &bytes)
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(StatusCode::CREATED)
}

pub async fn download(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path((session_id, path)): Path<(uuid::Uuid, String)>,
) -> impl IntoResponse {
    let session = state
        .runtime
        .sessions()
        .get(SessionId(session_id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    let container_id = session.container_id.clone().ok_or_else(|| {
        ctx.wrap(DomainError::NotFound(
            "session has no container".into(),
        ))
    })?;

    let bytes = state
        .runtime
        .backend()
        .download_from(&container_id, &path)
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(bytes)
}
