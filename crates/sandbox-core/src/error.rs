//! Domain error taxonomy.
//!
//! The ten kinds below are the error *kinds* named in the specification,
//! not a literal list of failure types: adapters and the store wrap their
//! own errors into one of these before they cross into `sandbox-control`
//! or `sandbox-server`.

use thiserror::Error;

/// Control-plane domain error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Payload validation, size/range limits, unknown template, missing fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown session/execution/template.
    #[error("not found: {0}")]
    NotFound(String),

    /// State machine violation (execute on terminated session, double delete, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Capacity, image pull, or readiness timeout while scheduling a session.
    #[error("scheduling failed: {0}")]
    SchedulingFailed(String),

    /// Container backend or database unreachable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Executor inside the container is not responding.
    #[error("executor unreachable: {0}")]
    ExecutorUnreachable(String),

    /// User code exited non-zero.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Wall-time exceeded for an execution.
    #[error("execution timeout")]
    ExecutionTimeout,

    /// Heartbeat gap and container gone while an execution was running.
    #[error("execution crashed: {0}")]
    ExecutionCrashed(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the REST error envelope (spec. §6.1).
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::SchedulingFailed(_) => "scheduling_failed",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::ExecutorUnreachable(_) => "executor_unreachable",
            Error::ExecutionFailed(_) => "execution_failed",
            Error::ExecutionTimeout => "execution_timeout",
            Error::ExecutionCrashed(_) => "execution_crashed",
            Error::Internal(_) => "internal",
        }
    }

    /// User-facing hint carried in the `solution` field; never the raw cause.
    pub fn solution(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "check the request body against the API schema",
            Error::NotFound(_) => "verify the id and that the resource has not been deleted",
            Error::Conflict(_) => "refresh the resource state before retrying",
            Error::SchedulingFailed(_) => "retry shortly or request a different template",
            Error::BackendUnavailable(_) => "retry with backoff; the control plane will reconcile",
            Error::ExecutorUnreachable(_) => "the sandbox may have crashed; check the session status",
            Error::ExecutionFailed(_) => "inspect stderr and the exit code for details",
            Error::ExecutionTimeout => "increase the execution timeout or optimize the handler",
            Error::ExecutionCrashed(_) => "the sandbox container was lost; resubmit the execution",
            Error::Internal(_) => "retry later; if this persists, contact the operator",
        }
    }
}

/// Result alias using the domain [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
