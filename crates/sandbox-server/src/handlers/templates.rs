//! `/templates` — register/list/inspect/deactivate (spec.md §6.1).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use sandbox_core::ids::TemplateId;
use sandbox_core::model::{ResourceLimit, Template};

use crate::error::ErrorContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterTemplateRequest {
    pub id: String,
    pub name: String,
    pub image: String,
    pub runtime_kind: String,
    pub default_limits: ResourceLimit,
    pub default_timeout_secs: u32,
    #[serde(default)]
    pub default_env: HashMap<String, String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<Template>,
}

pub async fn register_template(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Json(body): Json<RegisterTemplateRequest>,
) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let template = Template {
        id: TemplateId::from(body.id),
        name: body.name,
        image: body.image,
        runtime_kind: body.runtime_kind,
        default_limits: body.default_limits,
        default_timeout_secs: body.default_timeout_secs,
        default_env: body.default_env,
        active: body.active,
        created_at: now,
        updated_at: now,
    };

    state
        .runtime
        .templates()
        .register(&template)
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>((StatusCode::CREATED, Json(template)))
}

pub async fn list_templates(
    ctx: ErrorContext,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let templates = state
        .runtime
        .templates()
        .list_active()
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(Json(TemplateListResponse { templates }))
}

pub async fn get_template(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let template = state
        .runtime
        .templates()
        .get(&TemplateId::from(id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(Json(template))
}

pub async fn deactivate_template(
    ctx: ErrorContext,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state
        .runtime
        .templates()
        .deactivate(&TemplateId::from(id))
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok::<_, crate::error::ApiError>(StatusCode::NO_CONTENT)
}
