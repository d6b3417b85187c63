//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Install the Prometheus recorder; the handle renders `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "tubeflow_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "tubeflow_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "tubeflow_http_requests_in_flight";

    pub const INVOCATIONS_SUBMITTED_TOTAL: &str = "tubeflow_invocations_submitted_total";
    pub const INVOCATIONS_REJECTED_TOTAL: &str = "tubeflow_invocations_rejected_total";
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_invocation_submitted(handler: &str) {
    let labels = [("handler", handler.to_string())];
    counter!(names::INVOCATIONS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record a submission turned away before it reached the queue.
pub fn record_invocation_rejected(handler: &str) {
    let labels = [("handler", handler.to_string())];
    counter!(names::INVOCATIONS_REJECTED_TOTAL, &labels).increment(1);
}

static INVOCATION_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/v1/invocations/[^/]+").expect("static regex"));
static SCHEMA_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/v1/schemas/[^/]+").expect("static regex"));

/// Replace ids in the path so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let path = INVOCATION_PATH.replace(path, "/v1/invocations/:id");
    SCHEMA_PATH.replace(&path, "/v1/schemas/:name").into_owned()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
