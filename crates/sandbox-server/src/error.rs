//! HTTP error envelope.
//!
//! Wraps [`sandbox_core::Error`] for axum, mapping each domain error kind to
//! the status code spec.md §6.1 names and carrying the request id that
//! [`crate::middleware::ReqId`] assigned.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use sandbox_core::Error as DomainError;

use crate::middleware::ReqId;

/// JSON body returned on every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_code: &'static str,
    pub description: String,
    pub error_detail: String,
    pub solution: &'static str,
    pub request_id: String,
}

/// The HTTP-layer error type handlers return via `?`.
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(err: DomainError, request_id: String) -> Self {
        let status = status_for(&err);
        let body = ErrorBody {
            error_code: err.error_code(),
            description: err.to_string(),
            error_detail: err.to_string(),
            solution: err.solution(),
            request_id,
        };
        Self { status, body }
    }

    /// For handlers that haven't extracted a [`ReqId`] (rare — most should).
    pub fn without_request_id(err: DomainError) -> Self {
        Self::new(err, uuid::Uuid::new_v4().to_string())
    }
}

fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::SchedulingFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::ExecutorUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        // These three are normally terminal execution-record states, not
        // REST error responses (spec.md §6.1/§7) — surfaced here only if a
        // handler somehow propagates one directly.
        DomainError::ExecutionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DomainError::ExecutionTimeout => StatusCode::INTERNAL_SERVER_ERROR,
        DomainError::ExecutionCrashed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Carries the request's [`ReqId`] into handlers so `?` on a `DomainError`
/// produces an [`ApiError`] with the right id attached.
///
/// Handlers take this as their first extractor and convert failures with
/// `.map_err(|e| ctx.wrap(e))?`.
pub struct ErrorContext(String);

impl ErrorContext {
    pub fn wrap(&self, err: impl Into<DomainError>) -> ApiError {
        ApiError::new(err.into(), self.0.clone())
    }
}

impl<S> FromRequestParts<S> for ErrorContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let ReqId(id) = ReqId::from_request_parts(parts, state).await?;
        Ok(ErrorContext(id))
    }
}
