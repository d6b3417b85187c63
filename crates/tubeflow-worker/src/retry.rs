//! Backoff retry for queue and store bookkeeping, plus log-spam suppression.
//!
//! Invocations themselves are never retried in-process; this is only for the
//! short Redis calls that record an outcome.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Exponential backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Name used in log lines
    pub operation_name: &'static str,
}

impl RetryConfig {
    pub fn new(operation_name: &'static str) -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `retry` (1-based).
    fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the retries are used up.
///
/// Returns the last error together with the number of attempts made.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retries < config.max_retries => {
                retries += 1;
                let delay = config.delay_for(retries);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, retries, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err((e, retries + 1)),
        }
    }
}

/// Counts consecutive failures of a repeated operation and tells the caller
/// when to stop logging them.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    log_limit: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self {
            consecutive: 0,
            log_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.log_limit {
            debug!("Recovered after {} consecutive failures", self.consecutive);
        }
        self.consecutive = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        if self.consecutive == self.log_limit + 1 {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.log_limit
            );
        }
        self.consecutive <= self.log_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }
}
