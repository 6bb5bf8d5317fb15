//! Request id propagation and internal-callback bearer auth.
//!
//! Every response carries an `x-request-id` header and, for errors, the same
//! id in the JSON body (spec.md §6.1: "all responses carry a `request_id`").

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header::HeaderValue, request::Parts, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ReqId(pub String);

impl<S> FromRequestParts<S> for ReqId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ReqId>()
            .cloned()
            .unwrap_or_else(|| ReqId(uuid::Uuid::new_v4().to_string())))
    }
}

pub async fn assign_request_id(mut req: Request, next: Next) -> Response {
    let id = ReqId(uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(id.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id.0) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Bearer-auth guard for `/internal/*` routes (spec.md §6.2).
pub async fn require_internal_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == state.config.internal_api_token => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
