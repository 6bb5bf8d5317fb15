//! `/health`, `/health/detailed` (spec.md §6.1).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn liveness() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub database: &'static str,
    pub backend: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub dependencies: DependencyStatus,
}

pub async fn detailed(State(state): State<AppState>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1")
        .execute(state.runtime.sessions().pool())
        .await
    {
        Ok(_) => "ok",
        Err(_) => "unreachable",
    };

    let backend = match state.runtime.backend().list_nodes().await {
        Ok(_) => "ok",
        Err(_) => "unreachable",
    };

    let status = if database == "ok" && backend == "ok" {
        "ok"
    } else {
        "degraded"
    };

    let code = if status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(DetailedHealthResponse {
            status,
            dependencies: DependencyStatus { database, backend },
        }),
    )
}
