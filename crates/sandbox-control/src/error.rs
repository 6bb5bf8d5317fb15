//! Errors from the scheduler, dispatch engine, and reconciler/reaper.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] sandbox_store::StoreError),

    #[error(transparent)]
    Backend(#[from] sandbox_backend::BackendError),

    #[error(transparent)]
    Domain(#[from] sandbox_core::Error),

    #[error("executor request failed: {0}")]
    Executor(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ControlError>;

impl From<ControlError> for sandbox_core::Error {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::Store(e) => e.into(),
            ControlError::Backend(e) => e.into(),
            ControlError::Domain(e) => e,
            ControlError::Executor(e) => sandbox_core::Error::ExecutorUnreachable(e.to_string()),
            ControlError::Other(m) => sandbox_core::Error::Internal(m),
        }
    }
}
