//! Key-value progress store on Redis.
//!
//! Keys follow `<namespace>:<entity>:<identifier-type>:<value>`, e.g.
//! `tubeflow:download:progress:by-id:abc123`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;
use tubeflow_models::InvocationId;

use crate::error::QueueResult;
use crate::outcome::InvocationOutcome;

pub const DEFAULT_NAMESPACE: &str = "tubeflow:download";

/// What a key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// Entire snapshot
    Info,
    /// Reduced polling view
    Progress,
    /// Hash of file name to downloaded bytes
    DownloadedBytes,
    /// Invocation outcome record
    Result,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Info => "info",
            Entity::Progress => "progress",
            Entity::DownloadedBytes => "downloaded-bytes",
            Entity::Result => "result",
        }
    }
}

/// Which identifier a key is addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierType {
    InvocationId,
    Url,
    ContentId,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::InvocationId => "by-invocation-id",
            IdentifierType::Url => "by-url",
            IdentifierType::ContentId => "by-id",
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierType {
    type Err = String;

    /// Accepts both the bare name (`url`) and the key form (`by-url`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("by-").unwrap_or(s) {
            "invocation-id" => Ok(IdentifierType::InvocationId),
            "url" => Ok(IdentifierType::Url),
            "id" => Ok(IdentifierType::ContentId),
            other => Err(format!("unknown identifier type: {other}")),
        }
    }
}

/// Builds keys under one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressKeys {
    namespace: String,
}

impl Default for ProgressKeys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl ProgressKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, entity: Entity, id_type: IdentifierType, value: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            self.namespace,
            entity.as_str(),
            id_type.as_str(),
            value
        )
    }

    pub fn outcome_key(&self, invocation_id: &InvocationId) -> String {
        self.key(Entity::Result, IdentifierType::InvocationId, invocation_id.as_str())
    }
}

/// One write in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEntry {
    /// `SET key value`
    Set { key: String, value: String },
    /// `HSET key field value`
    HashSet {
        key: String,
        field: String,
        value: String,
    },
}

impl StoreEntry {
    pub fn key(&self) -> &str {
        match self {
            StoreEntry::Set { key, .. } | StoreEntry::HashSet { key, .. } => key,
        }
    }
}

/// A key-value sink accepting batched writes.
///
/// A batch is not atomic; a partially applied batch is superseded by the
/// next one.
#[async_trait]
pub trait KeyValueSink: Send + Sync {
    async fn write_batch(&self, entries: Vec<StoreEntry>) -> QueueResult<()>;
}

/// Progress store configuration.
#[derive(Debug, Clone)]
pub struct ProgressStoreConfig {
    pub redis_url: String,
    pub namespace: String,
    /// Expiry applied to every written key
    pub ttl: Duration,
}

impl Default for ProgressStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl ProgressStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("PROGRESS_REDIS_URL")
                .or_else(|_| std::env::var("REDIS_URL"))
                .unwrap_or(defaults.redis_url),
            namespace: std::env::var("PROGRESS_NAMESPACE").unwrap_or(defaults.namespace),
            ttl: std::env::var("PROGRESS_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
        }
    }
}

/// Redis-backed progress and outcome store.
pub struct RedisProgressStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    keys: ProgressKeys,
    ttl: Duration,
}

impl RedisProgressStore {
    pub fn new(config: ProgressStoreConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            keys: ProgressKeys::new(config.namespace),
            ttl: config.ttl,
        })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(ProgressStoreConfig::from_env())
    }

    pub fn keys(&self) -> &ProgressKeys {
        &self.keys
    }

    /// Shared multiplexed connection, reopened after a failure.
    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.connection.lock().await = None;
    }

    async fn run<T, F, Fut>(&self, op: F) -> QueueResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match op(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.reset_connection().await;
                }
                Err(e.into())
            }
        }
    }

    /// Write all entries as one non-transactional pipeline.
    pub async fn set_many(&self, entries: Vec<StoreEntry>) -> QueueResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let ttl = self.ttl.as_secs();
        let mut pipe = redis::pipe();
        for entry in &entries {
            match entry {
                StoreEntry::Set { key, value } => {
                    pipe.set_ex(key, value, ttl).ignore();
                }
                StoreEntry::HashSet { key, field, value } => {
                    pipe.hset(key, field, value).ignore();
                    pipe.expire(key, ttl as i64).ignore();
                }
            }
        }

        self.run(|mut conn| async move { pipe.query_async::<()>(&mut conn).await })
            .await?;

        debug!(entries = entries.len(), "Wrote progress batch");
        Ok(())
    }

    pub async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let key = key.to_string();
        self.run(|mut conn| async move { conn.get(key).await }).await
    }

    pub async fn get_hash(&self, key: &str) -> QueueResult<HashMap<String, String>> {
        let key = key.to_string();
        self.run(|mut conn| async move { conn.hgetall(key).await }).await
    }

    /// Stored entry of `entity` for one identifier.
    pub async fn get_entry(
        &self,
        entity: Entity,
        id_type: IdentifierType,
        value: &str,
    ) -> QueueResult<Option<String>> {
        self.get(&self.keys.key(entity, id_type, value)).await
    }

    pub async fn set_outcome(
        &self,
        invocation_id: &InvocationId,
        outcome: &InvocationOutcome,
    ) -> QueueResult<()> {
        let value = serde_json::to_string(outcome)?;
        self.set_many(vec![StoreEntry::Set {
            key: self.keys.outcome_key(invocation_id),
            value,
        }])
        .await
    }

    pub async fn get_outcome(
        &self,
        invocation_id: &InvocationId,
    ) -> QueueResult<Option<InvocationOutcome>> {
        match self.get(&self.keys.outcome_key(invocation_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn ping(&self) -> QueueResult<()> {
        self.run(|mut conn| async move { redis::cmd("PING").query_async::<()>(&mut conn).await })
            .await
    }
}

#[async_trait]
impl KeyValueSink for RedisProgressStore {
    async fn write_batch(&self, entries: Vec<StoreEntry>) -> QueueResult<()> {
        self.set_many(entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = ProgressKeys::default();
        assert_eq!(
            keys.key(Entity::Progress, IdentifierType::ContentId, "abc123"),
            "tubeflow:download:progress:by-id:abc123"
        );
        assert_eq!(
            keys.key(Entity::Info, IdentifierType::Url, "https://x/y"),
            "tubeflow:download:info:by-url:https://x/y"
        );
        assert_eq!(
            keys.key(Entity::DownloadedBytes, IdentifierType::InvocationId, "inv1"),
            "tubeflow:download:downloaded-bytes:by-invocation-id:inv1"
        );
        assert_eq!(
            keys.outcome_key(&InvocationId::from("inv1")),
            "tubeflow:download:result:by-invocation-id:inv1"
        );
    }

    #[test]
    fn test_identifier_type_parse() {
        assert_eq!("url".parse::<IdentifierType>(), Ok(IdentifierType::Url));
        assert_eq!("by-id".parse::<IdentifierType>(), Ok(IdentifierType::ContentId));
        assert_eq!(
            "invocation-id".parse::<IdentifierType>(),
            Ok(IdentifierType::InvocationId)
        );
        assert!("by-title".parse::<IdentifierType>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ProgressStoreConfig::default();
        assert_eq!(config.namespace, "tubeflow:download");
        assert_eq!(config.ttl, Duration::from_secs(86400));
    }
}
