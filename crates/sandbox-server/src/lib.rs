//! REST façade and internal callback API for the sandbox orchestration
//! control plane: wires [`sandbox_control::ControlPlaneRuntime`] onto an
//! axum [`axum::Router`].

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
