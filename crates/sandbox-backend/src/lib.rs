//! The Backend Adapter Port (spec.md §4.3): a narrow abstraction over a
//! container backend, with two concrete implementations (local Docker
//! engine, cluster orchestrator) plus an in-memory mock for tests.
//!
//! The rest of the control plane depends on the [`Backend`] trait only;
//! no crate outside this one is allowed to know about `bollard` or `kube`.

pub mod error;
pub mod mock;
pub mod port;

#[cfg(feature = "local")]
pub mod docker;

#[cfg(feature = "cluster")]
pub mod cluster;

pub use error::{BackendError, Result};
pub use port::{
    Backend, ContainerSpec, ContainerState, ContainerStatus, NodeCandidate, MountSpec,
};
