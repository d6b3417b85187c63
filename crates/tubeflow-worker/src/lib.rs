//! Download invocation worker.
//!
//! This crate provides:
//! - The invocation executor (scratch directory, engine run, persistence,
//!   retryable/terminal outcome)
//! - Ordered, best-effort progress forwarding into the key-value store
//! - The queue runner with bounded concurrency, heartbeats and retry limits
//! - Prometheus metrics and structured per-invocation logging

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod runner;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{
    Artifacts, Executor, ExecutorConfig, Outcome, RetryReason, TerminalError, TERMINAL_STATUS,
};
pub use logging::InvocationLogger;
pub use progress::{ProgressSession, ProgressTracker};
pub use runner::{settle, Action, InvocationRunner, Settlement, RETRIES_EXHAUSTED_STATUS};
