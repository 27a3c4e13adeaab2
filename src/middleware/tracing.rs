//! Request tracing middleware

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

use super::auth::ACTOR_HEADER;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware for logging request information with timing
///
/// Reuses the caller's `x-request-id` when present, otherwise generates one,
/// and echoes it on the response.
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let actor = request
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let start = Instant::now();

    tracing::info!(
        method = %method,
        path = %path,
        request_id = %request_id,
        actor = ?actor,
        "Request started"
    );

    let mut response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            request_id = %request_id,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            request_id = %request_id,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            request_id = %request_id,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}
