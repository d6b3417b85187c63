//! Application state.

use std::sync::Arc;

use tubeflow_queue::{
    InvocationQueue, ProgressStoreConfig, QueueConfig, QueueResult, RedisProgressStore,
};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<InvocationQueue>,
    pub store: Arc<RedisProgressStore>,
}

impl AppState {
    /// Create state from environment configuration. Redis is not contacted
    /// until the first request that needs it.
    pub fn new(config: ApiConfig) -> QueueResult<Self> {
        Self::with_backends(config, QueueConfig::from_env(), ProgressStoreConfig::from_env())
    }

    pub fn with_backends(
        config: ApiConfig,
        queue: QueueConfig,
        store: ProgressStoreConfig,
    ) -> QueueResult<Self> {
        Ok(Self {
            config,
            queue: Arc::new(InvocationQueue::new(queue)?),
            store: Arc::new(RedisProgressStore::new(store)?),
        })
    }
}
