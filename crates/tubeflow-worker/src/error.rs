//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failures of the worker process itself. Invocation failures are
/// [`Outcome`](crate::executor::Outcome) values, not errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Engine configuration error: {0}")]
    EngineConfig(#[from] tubeflow_media::EngineConfigError),

    #[error("Engine unavailable: {0}")]
    Engine(#[from] tubeflow_media::EngineFailure),

    #[error("Storage error: {0}")]
    Storage(#[from] tubeflow_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] tubeflow_queue::QueueError),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
