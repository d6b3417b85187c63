//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent invocations
    pub max_concurrent_invocations: usize,
    /// Parent directory for per-invocation scratch directories
    pub work_dir: PathBuf,
    /// Abort a download that reports no progress for this long (retryable)
    pub inactivity_timeout: Option<Duration>,
    /// Hard bound on one attempt of any handler (retryable)
    pub abort_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often to scan for pending invocations of crashed workers
    pub claim_interval: Duration,
    /// How often a running invocation refreshes its queue ownership
    pub heartbeat_interval: Duration,
    /// Bounded wait for queued progress writes after the engine returns
    pub progress_flush_timeout: Duration,
    /// Root for relative and `file://` destinations when S3 is not configured
    pub local_output_root: Option<PathBuf>,
    /// Prometheus listener port; metrics are off when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: 4,
            work_dir: std::env::temp_dir().join("tubeflow"),
            inactivity_timeout: Some(Duration::from_secs(300)),
            abort_timeout: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            progress_flush_timeout: Duration::from_secs(2),
            local_output_root: None,
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_invocations: env_parse("WORKER_MAX_INVOCATIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_invocations),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            // 0 disables the inactivity check
            inactivity_timeout: match env_secs("WORKER_INACTIVITY_TIMEOUT_SECS") {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.inactivity_timeout,
            },
            abort_timeout: env_secs("WORKER_ABORT_TIMEOUT_SECS").unwrap_or(defaults.abort_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .unwrap_or(defaults.shutdown_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.claim_interval),
            heartbeat_interval: env_secs("WORKER_HEARTBEAT_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.heartbeat_interval),
            progress_flush_timeout: env_parse::<u64>("WORKER_PROGRESS_FLUSH_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.progress_flush_timeout),
            local_output_root: std::env::var("LOCAL_OUTPUT_ROOT").ok().map(PathBuf::from),
            metrics_port: env_parse("METRICS_PORT"),
        }
    }
}
