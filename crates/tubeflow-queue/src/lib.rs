//! Redis plumbing around the invocation core.
//!
//! This crate provides:
//! - The invocation queue on Redis Streams (retry counting, DLQ, pending claim)
//! - The key-value progress store and its key layout
//! - Invocation outcome records for pollers

pub mod error;
pub mod invocation;
pub mod outcome;
pub mod progress_store;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use invocation::{DownloadInvocation, ExtractInfoInvocation, Invocation};
pub use outcome::InvocationOutcome;
pub use progress_store::{
    Entity, IdentifierType, KeyValueSink, ProgressKeys, ProgressStoreConfig, RedisProgressStore,
    StoreEntry, DEFAULT_NAMESPACE,
};
pub use queue::{InvocationQueue, QueueConfig};
