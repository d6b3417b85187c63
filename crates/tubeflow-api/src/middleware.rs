//! API middleware.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, Response};
use axum::middleware::Next;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, Span};
use uuid::Uuid;

use crate::handlers::INVOCATION_ID_HEADER;
use crate::state::AppState;

/// Request id header, echoed on every response.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

const MAX_REQUEST_ID_LEN: usize = 128;

/// CORS for browser clients that submit invocations and poll their progress.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let invocation_id = HeaderName::from_static("x-invocation-id");
    let request_id = HeaderName::from_static("x-request-id");

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, invocation_id.clone()])
        .expose_headers([invocation_id, request_id])
        .max_age(Duration::from_secs(600));

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}

/// Caller-supplied request ids are kept only when short and printable.
fn accepted_request_id(value: &HeaderValue) -> Option<String> {
    let value = value.to_str().ok()?.trim();
    let printable = value.bytes().all(|b| b.is_ascii_graphic());
    (printable && !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN).then(|| value.to_string())
}

/// Request ID middleware.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(accepted_request_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());
    Span::current().record("request_id", &request_id);

    let mut response = next.run(request).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Progress and outcome reads that clients repeat on a timer.
fn is_poll(method: &Method, path: &str) -> bool {
    method == Method::GET && (path == "/v1/progress" || path.starts_with("/v1/invocations/"))
}

/// Request logging middleware.
///
/// Submissions are logged with the invocation id they were queued under.
/// Health checks and metric scrapes go to debug, and so do polls unless
/// `log_polls` is set.
pub async fn request_logging(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis();
    let invocation_id = response
        .headers()
        .get(INVOCATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    let quiet = matches!(uri.path(), "/health" | "/ready" | "/metrics")
        || (!state.config.log_polls && is_poll(&method, uri.path()));

    if quiet {
        debug!(method = %method, uri = %uri, status = %status, duration_ms = %duration_ms, "Request completed");
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            invocation_id = %invocation_id,
            duration_ms = %duration_ms,
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polls_are_get_reads_of_progress_and_outcomes() {
        assert!(is_poll(&Method::GET, "/v1/progress"));
        assert!(is_poll(&Method::GET, "/v1/invocations/abc"));
        assert!(!is_poll(&Method::POST, "/v1/download"));
        assert!(!is_poll(&Method::GET, "/v1/schemas/download"));
    }

    #[test]
    fn test_request_id_must_be_short_and_printable() {
        let ok = HeaderValue::from_static("req-123");
        assert_eq!(accepted_request_id(&ok).as_deref(), Some("req-123"));

        let spaced = HeaderValue::from_static("a b");
        assert_eq!(accepted_request_id(&spaced), None);

        let long = HeaderValue::from_str(&"x".repeat(MAX_REQUEST_ID_LEN + 1)).unwrap();
        assert_eq!(accepted_request_id(&long), None);
    }
}
