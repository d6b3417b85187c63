//! Queue consumer loop around the [`Executor`].
//!
//! Maps each outcome onto the queue: success and terminal failures are
//! recorded and removed (terminal ones via the DLQ), retryable failures stay
//! pending and are re-delivered by the pending-claim scan until the attempt
//! limit is reached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use tubeflow_queue::{Invocation, InvocationOutcome, InvocationQueue, RedisProgressStore};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::executor::{Executor, Outcome, RetryReason};
use crate::logging::InvocationLogger;
use crate::metrics;
use crate::retry::{retry_async, RetryConfig};

/// Status recorded when the attempt limit is exhausted.
pub const RETRIES_EXHAUSTED_STATUS: u16 = 503;

/// What to do with the queue message after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Ack,
    DeadLetter(String),
    /// Leave pending for re-delivery.
    Redeliver,
}

/// Outcome record plus queue action for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub record: InvocationOutcome,
    pub action: Action,
}

/// Decide how an attempt ends.
///
/// `attempt` is the 1-based number of the attempt that produced `outcome`.
pub fn settle(handler: &str, outcome: Outcome<Value>, attempt: u32, max_retries: u32) -> Settlement {
    match outcome {
        Outcome::Success(result) => Settlement {
            record: InvocationOutcome::succeeded(handler, result),
            action: Action::Ack,
        },
        Outcome::Terminal(error) => Settlement {
            action: Action::DeadLetter(error.message.clone()),
            record: InvocationOutcome::failed(handler, error.status, error.kind, error.message, attempt),
        },
        Outcome::Retry(reason) if attempt >= max_retries => Settlement {
            action: Action::DeadLetter(format!("retries exhausted: {reason}")),
            record: InvocationOutcome::failed(
                handler,
                RETRIES_EXHAUSTED_STATUS,
                reason.kind,
                reason.message,
                attempt,
            ),
        },
        Outcome::Retry(reason) => Settlement {
            record: InvocationOutcome::retrying(handler, attempt, reason.to_string()),
            action: Action::Redeliver,
        },
    }
}

struct RunnerContext {
    config: WorkerConfig,
    queue: Arc<InvocationQueue>,
    store: Arc<RedisProgressStore>,
    executor: Arc<Executor>,
    semaphore: Arc<Semaphore>,
    consumer_name: String,
}

/// Consumes invocations with bounded concurrency.
pub struct InvocationRunner {
    ctx: Arc<RunnerContext>,
}

impl InvocationRunner {
    pub fn new(
        config: WorkerConfig,
        queue: InvocationQueue,
        store: Arc<RedisProgressStore>,
        executor: Executor,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_invocations));
        Self {
            ctx: Arc::new(RunnerContext {
                config,
                queue: Arc::new(queue),
                store,
                executor: Arc::new(executor),
                semaphore,
                consumer_name: format!("worker-{}", Uuid::new_v4()),
            }),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.ctx.consumer_name
    }

    /// Run until `shutdown` resolves, then wait for in-flight invocations.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> WorkerResult<()> {
        info!(
            "Starting invocation runner '{}' with {} max concurrent invocations",
            self.ctx.consumer_name, self.ctx.config.max_concurrent_invocations
        );

        self.ctx.queue.init().await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let claim_task = tokio::spawn(claim_loop(Arc::clone(&self.ctx), stop_rx));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping runner");
                    break;
                }
                result = self.consume() => {
                    if let Err(e) = result {
                        error!("Error consuming invocations: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        claim_task.await.ok();

        info!("Waiting for in-flight invocations to complete...");
        let all = self.ctx.config.max_concurrent_invocations as u32;
        if tokio::time::timeout(
            self.ctx.config.shutdown_timeout,
            self.ctx.semaphore.acquire_many(all),
        )
        .await
        .is_err()
        {
            warn!("Shutdown timeout reached with invocations still running");
        }

        info!("Invocation runner stopped");
        Ok(())
    }

    async fn consume(&self) -> WorkerResult<()> {
        let available = self.ctx.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let invocations = self
            .ctx
            .queue
            .consume(&self.ctx.consumer_name, 1000, available.min(5))
            .await?;

        if !invocations.is_empty() {
            debug!("Consumed {} invocations from queue", invocations.len());
        }

        for (message_id, invocation) in invocations {
            spawn_invocation(&self.ctx, message_id, invocation).await;
        }

        Ok(())
    }
}

async fn claim_loop(ctx: Arc<RunnerContext>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(ctx.config.claim_interval);
    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                match ctx.queue.claim_pending(&ctx.consumer_name, 5).await {
                    Ok(claimed) if !claimed.is_empty() => {
                        info!("Claimed {} pending invocations", claimed.len());
                        for (message_id, invocation) in claimed {
                            spawn_invocation(&ctx, message_id, invocation).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to claim pending invocations: {}", e),
                }
            }
        }
    }
}

async fn spawn_invocation(ctx: &Arc<RunnerContext>, message_id: String, invocation: Invocation) {
    let permit = match Arc::clone(&ctx.semaphore).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Semaphore closed, leaving {} pending", message_id);
            return;
        }
    };
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        execute(ctx, message_id, invocation, permit).await;
    });
}

async fn execute(
    ctx: Arc<RunnerContext>,
    message_id: String,
    invocation: Invocation,
    _permit: OwnedSemaphorePermit,
) {
    let handler = invocation.handler();
    let invocation_id = invocation.invocation_id().clone();
    let logger = InvocationLogger::new(&invocation_id, handler);

    let outcome = run_with_heartbeat(&ctx, &message_id, &invocation)
        .instrument(logger.span())
        .await;
    metrics::record_invocation(handler, outcome.label());

    let attempt = match &outcome {
        Outcome::Retry(_) => match ctx.queue.increment_retry(&message_id).await {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!(invocation_id = %invocation_id, "Failed to count retry, leaving pending: {}", e);
                return;
            }
        },
        _ => ctx.queue.get_retry_count(&message_id).await.unwrap_or(0) + 1,
    };

    let settlement = settle(handler, outcome, attempt, ctx.queue.max_retries());

    let store_retry = RetryConfig::new("record_outcome").with_max_retries(5);
    if let Err((e, attempts)) = retry_async(&store_retry, || {
        ctx.store.set_outcome(&invocation_id, &settlement.record)
    })
    .await
    {
        error!(
            invocation_id = %invocation_id,
            "Failed to record outcome after {} attempts: {}", attempts, e
        );
    }

    let queue_retry = RetryConfig::new("settle_message");
    let result = match &settlement.action {
        Action::Ack => retry_async(&queue_retry, || ctx.queue.ack(&message_id)).await,
        Action::DeadLetter(reason) => {
            retry_async(&queue_retry, || ctx.queue.dlq(&message_id, &invocation, reason)).await
        }
        Action::Redeliver => {
            info!(
                invocation_id = %invocation_id,
                "Invocation will be retried (attempt {}/{})",
                attempt,
                ctx.queue.max_retries()
            );
            Ok(())
        }
    };

    if let Err((e, _)) = result {
        error!(invocation_id = %invocation_id, "Failed to settle message {}: {}", message_id, e);
    }
}

/// Run the executor under the abort timeout, refreshing queue ownership
/// while it runs.
async fn run_with_heartbeat(
    ctx: &RunnerContext,
    message_id: &str,
    invocation: &Invocation,
) -> Outcome<Value> {
    let abort = ctx.config.abort_timeout;
    let run = tokio::time::timeout(abort, ctx.executor.execute(invocation));
    tokio::pin!(run);

    let mut heartbeat = tokio::time::interval(ctx.config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            result = &mut run => {
                return result.unwrap_or_else(|_| {
                    Outcome::Retry(RetryReason {
                        kind: "aborted".to_string(),
                        message: format!("attempt exceeded {}s", abort.as_secs()),
                    })
                });
            }
            _ = heartbeat.tick() => {
                if let Err(e) = ctx.queue.touch(&ctx.consumer_name, message_id).await {
                    debug!("Heartbeat for {} failed: {}", message_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TerminalError;
    use serde_json::json;

    fn retry() -> Outcome<Value> {
        Outcome::Retry(RetryReason {
            kind: "transport".to_string(),
            message: "Connection reset by peer".to_string(),
        })
    }

    #[test]
    fn test_success_is_acked() {
        let settlement = settle("download", Outcome::Success(json!({"bytes": 1})), 1, 3);
        assert_eq!(settlement.action, Action::Ack);
        assert!(matches!(settlement.record, InvocationOutcome::Succeeded { .. }));
    }

    #[test]
    fn test_terminal_goes_to_dlq_with_422() {
        let outcome = Outcome::Terminal(TerminalError::new("http", "HTTP Error 404: Not Found"));
        let settlement = settle("download", outcome, 1, 3);

        assert_eq!(
            settlement.action,
            Action::DeadLetter("HTTP Error 404: Not Found".to_string())
        );
        let InvocationOutcome::Failed { status, kind, .. } = settlement.record else {
            panic!("expected failed record");
        };
        assert_eq!(status, 422);
        assert_eq!(kind, "http");
    }

    #[test]
    fn test_retry_is_redelivered_until_exhausted() {
        let first = settle("extract_info", retry(), 1, 3);
        assert_eq!(first.action, Action::Redeliver);
        assert!(!first.record.is_final());

        let last = settle("extract_info", retry(), 3, 3);
        assert!(matches!(last.action, Action::DeadLetter(_)));
        let InvocationOutcome::Failed { status, attempts, .. } = last.record else {
            panic!("expected failed record");
        };
        assert_eq!(status, RETRIES_EXHAUSTED_STATUS);
        assert_eq!(attempts, 3);
    }
}
