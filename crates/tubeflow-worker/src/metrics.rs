//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
        .map_err(|e| WorkerError::Metrics(e.to_string()))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const INVOCATIONS_TOTAL: &str = "tubeflow_invocations_total";
    pub const ENGINE_DURATION_SECONDS: &str = "tubeflow_engine_duration_seconds";
    pub const FAILURES_CLASSIFIED_TOTAL: &str = "tubeflow_failures_classified_total";
    pub const PROGRESS_WRITES_TOTAL: &str = "tubeflow_progress_writes_total";
    pub const PROGRESS_WRITE_FAILURES_TOTAL: &str = "tubeflow_progress_write_failures_total";
    pub const PERSISTED_FILES_TOTAL: &str = "tubeflow_persisted_files_total";
    pub const PERSISTED_BYTES_TOTAL: &str = "tubeflow_persisted_bytes_total";
    pub const SKIPPED_FILES_TOTAL: &str = "tubeflow_skipped_files_total";
}

/// Record an invocation attempt's outcome (`success`, `retry`, `terminal`).
pub fn record_invocation(handler: &str, outcome: &str) {
    let labels = [
        ("handler", handler.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::INVOCATIONS_TOTAL, &labels).increment(1);
}

pub fn record_engine_duration(handler: &str, duration_secs: f64) {
    let labels = [("handler", handler.to_string())];
    histogram!(names::ENGINE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_failure_classified(kind: &str, retryable: bool) {
    let labels = [
        ("kind", kind.to_string()),
        ("retryable", retryable.to_string()),
    ];
    counter!(names::FAILURES_CLASSIFIED_TOTAL, &labels).increment(1);
}

pub fn record_progress_write() {
    counter!(names::PROGRESS_WRITES_TOTAL).increment(1);
}

pub fn record_progress_write_failure() {
    counter!(names::PROGRESS_WRITE_FAILURES_TOTAL).increment(1);
}

pub fn record_persisted(files: usize, skipped: usize, bytes: u64) {
    counter!(names::PERSISTED_FILES_TOTAL).increment(files as u64);
    counter!(names::SKIPPED_FILES_TOTAL).increment(skipped as u64);
    counter!(names::PERSISTED_BYTES_TOTAL).increment(bytes);
}
