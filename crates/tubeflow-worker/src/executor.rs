//! Runs one download or extract-info invocation.
//!
//! Every call ends in one of three outcomes: success, a retryable failure the
//! host should re-deliver, or a terminal failure carrying status 422 that must
//! not be retried. Failures are classified once, here, right after the engine
//! returns; nothing is retried in-process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;
use tracing::warn;
use tubeflow_media::{
    DownloadEngine, EngineConfig, EngineFailure, EngineParams, ErrorClassifier,
};
use tubeflow_models::{
    DownloadOptions, DownloadRequest, ExtractInfoRequest, ExtractInfoResponse, InvocationId,
    ModelError, PathFilter,
};
use tubeflow_queue::Invocation;
use tubeflow_storage::{DirectoryPersister, StorageError};

use crate::config::WorkerConfig;
use crate::logging::InvocationLogger;
use crate::metrics;
use crate::progress::{ProgressSession, ProgressTracker};

/// Status carried by every terminal failure.
pub const TERMINAL_STATUS: u16 = 422;

/// Result of one handler call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    /// Transient failure; the host should invoke the handler again.
    Retry(RetryReason),
    /// Must not be retried.
    Terminal(TerminalError),
}

impl<T> Outcome<T> {
    /// Metric/log label: `success`, `retry` or `terminal`.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Retry(_) => "retry",
            Outcome::Terminal(_) => "terminal",
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Retry(reason) => Outcome::Retry(reason),
            Outcome::Terminal(error) => Outcome::Terminal(error),
        }
    }

    fn retry(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Outcome::Retry(RetryReason {
            kind: kind.into(),
            message: message.into(),
        })
    }

    fn terminal(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Outcome::Terminal(TerminalError::new(kind, message))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct RetryReason {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct TerminalError {
    pub status: u16,
    pub kind: String,
    pub message: String,
}

impl TerminalError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: TERMINAL_STATUS,
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// What a successful download persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub destination: String,
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub bytes: u64,
}

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Parent of the per-invocation scratch directories
    pub work_dir: PathBuf,
    pub defaults: EngineParams,
    pub overrides: EngineParams,
    pub inactivity_timeout: Option<Duration>,
    pub progress_flush_timeout: Duration,
}

impl ExecutorConfig {
    pub fn new(worker: &WorkerConfig, engine: &EngineConfig) -> Self {
        Self {
            work_dir: worker.work_dir.clone(),
            defaults: engine.defaults.clone(),
            overrides: engine.overrides.clone(),
            inactivity_timeout: worker.inactivity_timeout,
            progress_flush_timeout: worker.progress_flush_timeout,
        }
    }
}

enum EngineRun {
    Failed(EngineFailure),
    Stalled(Duration),
}

/// Orchestrates engine, progress tracking, classification and persistence.
pub struct Executor {
    engine: Arc<dyn DownloadEngine>,
    persister: Arc<dyn DirectoryPersister>,
    tracker: ProgressTracker,
    classifier: ErrorClassifier,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        persister: Arc<dyn DirectoryPersister>,
        tracker: ProgressTracker,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            engine,
            persister,
            tracker,
            classifier: ErrorClassifier::new(),
            config,
        }
    }

    /// Dispatch a queued invocation; the success payload is its JSON result.
    pub async fn execute(&self, invocation: &Invocation) -> Outcome<Value> {
        let outcome = match invocation {
            Invocation::Download(call) => self
                .download(&call.invocation_id, &call.request)
                .await
                .map(|artifacts| serde_json::to_value(artifacts)),
            Invocation::ExtractInfo(call) => self
                .extract_info(&call.invocation_id, &call.request)
                .await
                .map(|response| serde_json::to_value(response)),
        };

        match outcome {
            Outcome::Success(Ok(value)) => Outcome::Success(value),
            Outcome::Success(Err(e)) => Outcome::terminal("serialization", e.to_string()),
            Outcome::Retry(reason) => Outcome::Retry(reason),
            Outcome::Terminal(error) => Outcome::Terminal(error),
        }
    }

    /// Download into a scratch directory and persist the filter-accepted files.
    ///
    /// The scratch directory is removed on every exit path, including when
    /// this future is dropped.
    pub async fn download(&self, id: &InvocationId, request: &DownloadRequest) -> Outcome<Artifacts> {
        let logger = InvocationLogger::new(id, "download");
        if let Err(e) = request.check() {
            return self.rejected(&logger, e);
        }
        if let Err(e) = self.persister.check(&request.output.destination) {
            return self.persist_failed(&logger, e);
        }

        logger.log_start(&request.url.to_string());
        let urls = request.url.to_vec();
        let params = self.merged_params(request.options.as_ref());

        let scratch = match self.scratch_dir().await {
            Ok(dir) => dir,
            Err(e) => {
                logger.log_retry("scratch", &e.to_string());
                return Outcome::retry("scratch", e.to_string());
            }
        };

        let session = self.tracker.start(id.clone(), urls.clone());
        let started = Instant::now();
        let result = self
            .run_download(&params, &urls, scratch.path(), &session)
            .await;
        metrics::record_engine_duration("download", started.elapsed().as_secs_f64());
        session.finish(self.config.progress_flush_timeout).await;

        let outcome = match result {
            Ok(()) => self.persist(&logger, request, scratch.path()).await,
            Err(EngineRun::Failed(failure)) => self.classified(&logger, &failure),
            Err(EngineRun::Stalled(limit)) => {
                let message = format!("no progress for {}s", limit.as_secs());
                logger.log_retry("stalled", &message);
                Outcome::retry("stalled", message)
            }
        };

        if let Err(e) = scratch.close() {
            warn!(invocation_id = %id, "Failed to remove scratch directory: {}", e);
        }
        outcome
    }

    /// Resolve metadata without downloading or persisting anything.
    pub async fn extract_info(
        &self,
        id: &InvocationId,
        request: &ExtractInfoRequest,
    ) -> Outcome<ExtractInfoResponse> {
        let logger = InvocationLogger::new(id, "extract_info");
        if let Err(e) = request.check() {
            return self.rejected(&logger, e);
        }

        logger.log_start(&request.url);
        let params = self.merged_params(request.options.as_ref());

        let started = Instant::now();
        let result = self.engine.extract_info(&params, &request.url).await;
        metrics::record_engine_duration("extract_info", started.elapsed().as_secs_f64());

        match result {
            Ok(info) => match ExtractInfoResponse::from_info(&info) {
                Ok(response) => {
                    logger.log_completion(&response.id);
                    Outcome::Success(response)
                }
                Err(e) => {
                    logger.log_terminal("extraction", &e.to_string());
                    Outcome::terminal("extraction", e.to_string())
                }
            },
            Err(failure) => self.classified(&logger, &failure),
        }
    }

    /// `defaults < request < overrides`
    pub fn merged_params(&self, request: Option<&DownloadOptions>) -> EngineParams {
        EngineParams::merge(&self.config.defaults, request, &self.config.overrides)
    }

    async fn scratch_dir(&self) -> std::io::Result<TempDir> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        tempfile::Builder::new()
            .prefix("invocation-")
            .tempdir_in(&self.config.work_dir)
    }

    async fn run_download(
        &self,
        params: &EngineParams,
        urls: &[String],
        output_root: &Path,
        session: &ProgressSession,
    ) -> Result<(), EngineRun> {
        let download = self
            .engine
            .download(params, urls, output_root, session.sink());

        let Some(limit) = self.config.inactivity_timeout else {
            return download.await.map_err(EngineRun::Failed);
        };

        let activity = session.activity();
        let watchdog = async {
            while tokio::time::timeout(limit, activity.notified()).await.is_ok() {}
        };

        tokio::select! {
            result = download => result.map_err(EngineRun::Failed),
            _ = watchdog => Err(EngineRun::Stalled(limit)),
        }
    }

    async fn persist(
        &self,
        logger: &InvocationLogger,
        request: &DownloadRequest,
        source_dir: &Path,
    ) -> Outcome<Artifacts> {
        let destination = &request.output.destination;
        let filter = request
            .output
            .filter
            .as_ref()
            .map(|filter| filter as &dyn PathFilter);

        match self.persister.persist(destination, source_dir, filter).await {
            Ok(report) => {
                metrics::record_persisted(report.uploaded.len(), report.skipped.len(), report.bytes);
                logger.log_completion(&format!(
                    "persisted {} file(s) to {}",
                    report.uploaded.len(),
                    destination
                ));
                Outcome::Success(Artifacts {
                    destination: destination.to_string(),
                    uploaded: report.uploaded,
                    skipped: report.skipped,
                    bytes: report.bytes,
                })
            }
            Err(e) => self.persist_failed(logger, e),
        }
    }

    /// Destination faults are terminal; object-store and filesystem faults are retryable.
    fn persist_failed<T>(&self, logger: &InvocationLogger, error: StorageError) -> Outcome<T> {
        let message = error.to_string();
        if error.is_destination_error() {
            logger.log_terminal("destination", &message);
            Outcome::terminal("destination", message)
        } else {
            logger.log_retry("persistence", &message);
            Outcome::retry("persistence", message)
        }
    }

    fn classified<T>(&self, logger: &InvocationLogger, failure: &EngineFailure) -> Outcome<T> {
        let classification = self.classifier.classify(failure);
        let kind = classification.kind.as_str();
        metrics::record_failure_classified(kind, classification.retryable);

        if classification.retryable {
            logger.log_retry(kind, &classification.message);
            Outcome::retry(kind, classification.message)
        } else {
            logger.log_terminal(kind, &classification.message);
            Outcome::terminal(kind, classification.message)
        }
    }

    fn rejected<T>(&self, logger: &InvocationLogger, error: ModelError) -> Outcome<T> {
        logger.log_terminal("validation", &error.to_string());
        Outcome::terminal("validation", error.to_string())
    }
}
