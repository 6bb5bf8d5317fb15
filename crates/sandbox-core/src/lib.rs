//! Domain types, error taxonomy, and settings for the sandbox orchestration
//! control plane.
//!
//! This crate has no I/O. It defines the shapes that `sandbox-store`,
//! `sandbox-backend`, `sandbox-control`, and `sandbox-server` all depend on,
//! so that persistence, scheduling, and the REST façade agree on one model
//! of a session's lifecycle.

pub mod config;
pub mod error;
pub mod ids;
pub mod model;

pub use error::{Error, Result};
