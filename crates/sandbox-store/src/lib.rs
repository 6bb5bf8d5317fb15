//! Durable persistence for sessions, executions, and templates.
//!
//! The session store is the only shared mutable state in the control plane
//! (spec.md §5): every status transition goes through [`SessionStore`],
//! which takes a row-level lock scoped to the session id so the scheduler,
//! dispatch engine, and reaper never race on the same row.

pub mod error;
pub mod execution_store;
pub mod migrations;
pub mod session_store;
pub mod template_store;

pub use error::{Result, StoreError};
pub use execution_store::ExecutionStore;
pub use session_store::SessionStore;
pub use template_store::TemplateStore;
