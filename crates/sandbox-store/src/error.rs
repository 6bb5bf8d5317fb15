//! Errors from persistence operations.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("stale write: {0}")]
    Conflict(String),

    #[error("{0}")]
    Domain(#[from] sandbox_core::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for sandbox_core::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(kind, id) => {
                sandbox_core::Error::NotFound(format!("{kind} {id}"))
            }
            StoreError::Conflict(m) => sandbox_core::Error::Conflict(m),
            StoreError::Domain(e) => e,
            other => sandbox_core::Error::BackendUnavailable(other.to_string()),
        }
    }
}
