//! API configuration, read from `TUBEFLOW_API_*` variables.

use std::net::SocketAddr;
use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Browser origins allowed to submit and poll; `*` allows any
    pub cors_origins: Vec<String>,
    /// Per-request timeout; handlers only enqueue or read Redis
    pub request_timeout: Duration,
    /// Largest accepted invocation body, in bytes
    pub max_body_size: usize,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
    /// Log progress and outcome polls like any other request
    pub log_polls: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(10),
            max_body_size: 256 * 1024,
            metrics_enabled: true,
            log_polls: false,
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from any variable source. Unparseable values fall back
    /// to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            bind: lookup("TUBEFLOW_API_ADDR")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.bind),
            cors_origins: lookup("TUBEFLOW_API_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            request_timeout: parsed("TUBEFLOW_API_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: parsed("TUBEFLOW_API_MAX_BODY_BYTES")
                .filter(|bytes| *bytes > 0)
                .map(|bytes| bytes as usize)
                .unwrap_or(defaults.max_body_size),
            metrics_enabled: lookup("TUBEFLOW_API_METRICS")
                .map(|v| flag(&v))
                .unwrap_or(defaults.metrics_enabled),
            log_polls: lookup("TUBEFLOW_API_LOG_POLLS")
                .map(|v| flag(&v))
                .unwrap_or(defaults.log_polls),
        }
    }
}
