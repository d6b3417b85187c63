//! Invocation queue using Redis Streams.

use std::time::Duration;

use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::invocation::Invocation;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for invocations
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// Idle time after which a pending message is reclaimed
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "tubeflow:invocations".to_string(),
            consumer_group: "tubeflow:workers".to_string(),
            dlq_stream_name: "tubeflow:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
        }
    }
}

/// Redis Streams client for handler invocations.
///
/// Delivery is at-least-once: a message stays pending until acked or moved
/// to the DLQ, and pending messages idle past the visibility timeout are
/// reclaimed by another consumer.
pub struct InvocationQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl InvocationQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue an invocation. Rejects an invocation id seen within the last hour.
    pub async fn enqueue(&self, invocation: &Invocation) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(invocation)?;
        let idempotency_key = invocation.idempotency_key();

        // SET NX claims the key atomically, so concurrent duplicates lose.
        let dedup_key = format!("tubeflow:dedup:{}", idempotency_key);
        let claimed: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(3600)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !claimed {
            warn!("Duplicate invocation rejected: {}", idempotency_key);
            return Err(QueueError::DuplicateInvocation(idempotency_key));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("invocation")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                // Release the key so the caller can resubmit.
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            invocation_id = %invocation.invocation_id(),
            handler = invocation.handler(),
            "Enqueued invocation with message ID {}",
            message_id
        );

        Ok(message_id)
    }

    /// Acknowledge and delete a message.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(retry_key(message_id)).await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Move an invocation to the dead letter queue and ack the original.
    pub async fn dlq(
        &self,
        message_id: &str,
        invocation: &Invocation,
        error: &str,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(invocation)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("invocation")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(
            invocation_id = %invocation.invocation_id(),
            "Moved invocation to DLQ: {}",
            error
        );
        Ok(())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read new messages for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, Invocation)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = reply.keys.into_iter().flat_map(|key| key.ids);
        self.decode_entries(entries).await
    }

    /// Take over pending messages idle longer than the visibility timeout.
    ///
    /// Covers both crashed consumers and invocations left pending for a retry.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, Invocation)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(self.config.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let claimed = self.decode_entries(reply.claimed).await?;
        for (message_id, invocation) in &claimed {
            info!(
                invocation_id = %invocation.invocation_id(),
                "Claimed pending message {}",
                message_id
            );
        }
        Ok(claimed)
    }

    /// Reset a pending message's idle time so it is not reclaimed while
    /// this consumer is still working on it.
    pub async fn touch(&self, consumer_name: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn decode_entries(
        &self,
        entries: impl IntoIterator<Item = StreamId>,
    ) -> QueueResult<Vec<(String, Invocation)>> {
        let mut invocations = Vec::new();

        for entry in entries {
            match decode_payload(&entry) {
                Some(Ok(invocation)) => invocations.push((entry.id, invocation)),
                Some(Err(e)) => {
                    warn!("Failed to parse invocation payload {}: {}", entry.id, e);
                    // Ack the malformed message to prevent reprocessing
                    self.ack(&entry.id).await.ok();
                }
                None => {
                    warn!("Message {} has no invocation payload", entry.id);
                    self.ack(&entry.id).await.ok();
                }
            }
        }

        Ok(invocations)
    }

    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: Option<u32> = conn.get(retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment the attempt counter for a message; returns the new count.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

fn retry_key(message_id: &str) -> String {
    format!("tubeflow:retry:{}", message_id)
}

fn decode_payload(entry: &StreamId) -> Option<Result<Invocation, serde_json::Error>> {
    match entry.map.get("invocation") {
        Some(redis::Value::BulkString(payload)) => Some(serde_json::from_slice(payload)),
        Some(redis::Value::SimpleString(payload)) => Some(serde_json::from_str(payload)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "tubeflow:invocations");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.visibility_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_decode_payload() {
        let payload = r#"{"type":"extract_info","invocation_id":"inv1","request":{"url":"https://x/y"},"created_at":"2024-01-01T00:00:00Z"}"#;
        let mut map = HashMap::new();
        map.insert(
            "invocation".to_string(),
            redis::Value::BulkString(payload.as_bytes().to_vec()),
        );
        let entry = StreamId {
            id: "1-0".to_string(),
            map,
        };

        let invocation = decode_payload(&entry).unwrap().unwrap();
        assert_eq!(invocation.invocation_id().as_str(), "inv1");
        assert_eq!(invocation.handler(), "extract_info");
    }

    #[test]
    fn test_decode_missing_payload() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        assert!(decode_payload(&entry).is_none());
    }
}
