//! Router assembly: public REST surface under `/api/v1`, bearer-protected
//! internal callbacks under `/internal`, liveness under `/health` (spec.md
//! §6.1, §6.2).

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{callbacks, executions, files, health, sessions, templates};
use crate::middleware::{assign_request_id, require_internal_token};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/sessions", post(sessions::create_session).get(sessions::list_sessions))
        .route(
            "/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/{id}/execute", post(executions::execute))
        .route("/sessions/{id}/executions", get(executions::list_for_session))
        .route("/sessions/{id}/files", post(files::upload))
        .route("/sessions/{id}/files/{*path}", get(files::download))
        .route("/executions/{id}/status", get(executions::get_status))
        .route("/executions/{id}/result", get(executions::get_result))
        .route(
            "/templates",
            post(templates::register_template).get(templates::list_templates),
        )
        .route(
            "/templates/{id}",
            get(templates::get_template).delete(templates::deactivate_template),
        );

    let internal = Router::new()
        .route("/containers/ready", post(callbacks::container_ready))
        .route("/containers/exited", post(callbacks::container_exited))
        .route("/executions/{id}/result", post(callbacks::execution_result))
        .route("/executions/{id}/heartbeat", post(callbacks::heartbeat))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    Router::new()
        .nest("/api/v1", public)
        .nest("/internal", internal)
        .route("/health", get(health::liveness))
        .route("/health/detailed", get(health::detailed))
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
