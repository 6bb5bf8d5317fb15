pub mod artifacts;
pub mod callback;
pub mod config;
pub mod handlers;
pub mod isolation;
pub mod pipeline;
pub mod queue;
pub mod sentinel;
pub mod state;

pub use config::ExecutorConfig;
pub use state::ExecutorState;

use axum::routing::{get, post};
use axum::Router;

pub fn build_router(state: ExecutorState) -> Router {
    Router::new()
        .route("/health", get(handlers::liveness))
        .route("/execute", post(handlers::execute))
        .with_state(state)
}
