//! Capability interfaces for the download/extraction engine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use tubeflow_models::ProgressSnapshot;

use crate::error::EngineResult;
use crate::params::EngineParams;

/// Receives progress snapshots while a download runs.
///
/// Called synchronously from the engine's read loop, so implementations
/// must return quickly and must not fail the job.
pub trait ProgressSink: Send + Sync {
    fn on_snapshot(&self, snapshot: ProgressSnapshot);
}

/// Deliver a snapshot, containing any panic raised by the sink.
pub fn deliver(sink: &dyn ProgressSink, snapshot: ProgressSnapshot) {
    if catch_unwind(AssertUnwindSafe(|| sink.on_snapshot(snapshot))).is_err() {
        warn!("Progress sink panicked, snapshot dropped");
    }
}

/// A media download/extraction engine.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Download `urls` into `output_root`, reporting progress to `progress`.
    async fn download(
        &self,
        params: &EngineParams,
        urls: &[String],
        output_root: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> EngineResult<()>;

    /// Resolve metadata for `url` without downloading media.
    async fn extract_info(&self, params: &EngineParams, url: &str) -> EngineResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tubeflow_models::ProgressStatus;

    struct Panicking;

    impl ProgressSink for Panicking {
        fn on_snapshot(&self, _snapshot: ProgressSnapshot) {
            panic!("sink exploded");
        }
    }

    struct Counting(AtomicUsize);

    impl ProgressSink for Counting {
        fn on_snapshot(&self, _snapshot: ProgressSnapshot) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_deliver_contains_panics() {
        deliver(&Panicking, ProgressSnapshot::new(ProgressStatus::Downloading));
        // Still usable afterwards.
        deliver(&Panicking, ProgressSnapshot::new(ProgressStatus::Finished));
    }

    #[test]
    fn test_deliver_forwards() {
        let sink = Counting(AtomicUsize::new(0));
        deliver(&sink, ProgressSnapshot::new(ProgressStatus::Downloading));
        deliver(&sink, ProgressSnapshot::new(ProgressStatus::Finished));
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }
}
