//! Liveness and readiness of the ingress.
//!
//! Ready means both Redis-backed stores answer: the invocation stream that
//! workers consume and the progress store that pollers read.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tubeflow_queue::{InvocationQueue, QueueResult};

use crate::state::AppState;

/// Liveness response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness: the process is up and serving.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub queue: QueueCheck,
    pub progress_store: CheckStatus,
}

#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn from_result(result: QueueResult<()>, start: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok",
                error: None,
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => Self {
                status: "error",
                error: Some(e.to_string()),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Queue reachability plus stream depths.
#[derive(Debug, Serialize)]
pub struct QueueCheck {
    #[serde(flatten)]
    pub check: CheckStatus,
    /// Invocations in the stream, delivered or not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_lettered: Option<u64>,
}

async fn check_queue(queue: &InvocationQueue) -> QueueCheck {
    let start = Instant::now();
    let check = CheckStatus::from_result(queue.ping().await, start);
    if !check.is_ok() {
        return QueueCheck {
            check,
            queued: None,
            dead_lettered: None,
        };
    }

    QueueCheck {
        check,
        queued: queue.len().await.ok(),
        dead_lettered: queue.dlq_len().await.ok(),
    }
}

fn readiness(queue: QueueCheck, progress_store: CheckStatus) -> (StatusCode, ReadinessResponse) {
    let all_ok = queue.check.is_ok() && progress_store.is_ok();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" },
        checks: ReadinessChecks {
            queue,
            progress_store,
        },
    };
    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, response)
}

/// Readiness: 503 until the queue and the progress store both answer.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let queue = check_queue(&state.queue).await;

    let start = Instant::now();
    let progress_store = CheckStatus::from_result(state.store.ping().await, start);

    let (status, response) = readiness(queue, progress_store);
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> CheckStatus {
        CheckStatus {
            status: "ok",
            error: None,
            latency_ms: Some(1),
        }
    }

    fn failed() -> CheckStatus {
        CheckStatus {
            status: "error",
            error: Some("connection refused".to_string()),
            latency_ms: None,
        }
    }

    fn queue(check: CheckStatus, queued: Option<u64>) -> QueueCheck {
        QueueCheck {
            check,
            queued,
            dead_lettered: queued.map(|_| 0),
        }
    }

    #[test]
    fn test_ready_when_both_stores_answer() {
        let (status, response) = readiness(queue(ok(), Some(3)), ok());
        assert_eq!(status, StatusCode::OK);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["checks"]["queue"]["status"], "ok");
        assert_eq!(json["checks"]["queue"]["queued"], 3);
        assert_eq!(json["checks"]["queue"]["dead_lettered"], 0);
    }

    #[test]
    fn test_degraded_when_progress_store_is_down() {
        let (status, response) = readiness(queue(ok(), Some(0)), failed());
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["checks"]["progress_store"]["error"], "connection refused");
    }

    #[test]
    fn test_unreachable_queue_omits_depths() {
        let (status, response) = readiness(queue(failed(), None), ok());
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["checks"]["queue"].get("queued").is_none());
    }
}
