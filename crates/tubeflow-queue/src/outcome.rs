//! Final and intermediate invocation outcomes, as stored for pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened to an invocation so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Succeeded {
        handler: String,
        result: Value,
        completed_at: DateTime<Utc>,
    },
    Failed {
        handler: String,
        /// Client-error status of the terminal failure
        status: u16,
        kind: String,
        message: String,
        attempts: u32,
        completed_at: DateTime<Utc>,
    },
    Retrying {
        handler: String,
        attempt: u32,
        reason: String,
        updated_at: DateTime<Utc>,
    },
}

impl InvocationOutcome {
    pub fn succeeded(handler: impl Into<String>, result: Value) -> Self {
        Self::Succeeded {
            handler: handler.into(),
            result,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(
        handler: impl Into<String>,
        status: u16,
        kind: impl Into<String>,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self::Failed {
            handler: handler.into(),
            status,
            kind: kind.into(),
            message: message.into(),
            attempts,
            completed_at: Utc::now(),
        }
    }

    pub fn retrying(handler: impl Into<String>, attempt: u32, reason: impl Into<String>) -> Self {
        Self::Retrying {
            handler: handler.into(),
            attempt,
            reason: reason.into(),
            updated_at: Utc::now(),
        }
    }

    /// Whether no further attempts will follow.
    pub fn is_final(&self) -> bool {
        !matches!(self, InvocationOutcome::Retrying { .. })
    }
}
