//! Bearer token gate.

use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const BEARER: &str = "Bearer ";

/// Reject requests whose `Authorization` header is not a bearer token.
pub async fn require_bearer(req: Request, next: Next) -> Response {
    let has_bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(BEARER) && v.len() > BEARER.len());

    if !has_bearer {
        return (StatusCode::UNAUTHORIZED, "bearer token required").into_response();
    }
    next.run(req).await
}
