//! Scheduler, dispatch engine, and reconciler/reaper for the sandbox
//! orchestration control plane.
//!
//! This crate owns every piece of state that can mutate a session or
//! execution after it has been persisted. It depends on `sandbox-store` for
//! the session/execution/template tables and on `sandbox-backend` for the
//! container operations a session's lifecycle needs; it knows nothing about
//! HTTP routing, which lives in `sandbox-server`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          sandbox-server                           │
//! │                      (REST façade, axum)                          │
//! └───────────────────────────────┬────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        sandbox-control (this crate)                │
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────────────────┐   │
//! │  │ Scheduler  │   │DispatchEngine│   │ Reaper (reconciler)   │   │
//! │  └─────┬──────┘   └──────┬───────┘   └───────────┬───────────┘   │
//! └────────┼─────────────────┼───────────────────────┼───────────────┘
//!          │                 │                       │
//!          ▼                 ▼                       ▼
//! ┌──────────────────┐                      ┌────────────────────┐
//! │  sandbox-store    │◄─────────────────────│  sandbox-backend   │
//! │ (sessions/execs/  │                      │ (Docker/cluster/   │
//! │  templates)       │                      │  mock adapters)    │
//! └──────────────────┘                      └────────────────────┘
//! ```
//!
//! # Session Lifecycle
//!
//! Transitions are enforced in one place, [`sandbox_store::SessionStore::transition`];
//! this crate only decides *when* to ask for one. See spec.md §4.1's state
//! diagram for the full PENDING → CREATING → STARTING → RUNNING →
//! {COMPLETED, TERMINATED, FAILED, TIMEOUT} machine.
//!
//! # Modules
//!
//! - [`error`]: the control-plane error taxonomy, layered over
//!   `sandbox-store`/`sandbox-backend`/`sandbox-core` errors
//! - [`scheduler`]: node selection, container creation, and the readiness wait
//! - [`dispatch`]: forwarding `execute` requests to the in-container executor
//!   and watchdogging them
//! - [`reaper`]: startup state-sync and the periodic idle/lifetime/heartbeat
//!   reap passes
//! - [`runtime`]: an embeddable builder wiring the above into one handle

/// Control-plane error taxonomy.
pub mod error;

/// Scheduler: node selection, container creation, readiness wait.
pub mod scheduler;

/// Dispatch engine: executor handoff and watchdog.
pub mod dispatch;

/// Reconciler & reaper: startup state-sync and periodic reap passes.
pub mod reaper;

/// Embeddable runtime composition root.
pub mod runtime;

pub use error::ControlError;
pub use runtime::{ControlPlaneRuntime, ControlPlaneRuntimeBuilder};
