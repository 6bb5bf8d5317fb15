//! Errors from backend adapter operations.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("container already exists: {0}")]
    ContainerExists(String),

    #[error("image pull failed: {0}")]
    ImagePull(String),

    #[error("no capacity available")]
    NoCapacity,

    #[error("operation timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "local")]
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for sandbox_core::Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::ContainerNotFound(m) => sandbox_core::Error::NotFound(m),
            BackendError::ContainerExists(m) => sandbox_core::Error::Conflict(m),
            BackendError::ImagePull(m) => sandbox_core::Error::SchedulingFailed(m),
            BackendError::NoCapacity => {
                sandbox_core::Error::SchedulingFailed("no backend capacity available".into())
            }
            BackendError::Timeout => {
                sandbox_core::Error::BackendUnavailable("backend call timed out".into())
            }
            other => sandbox_core::Error::BackendUnavailable(other.to_string()),
        }
    }
}
