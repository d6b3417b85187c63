//! Structured invocation logging.

use tracing::{error, info, warn, Span};
use tubeflow_models::InvocationId;

/// Logs invocation lifecycle events with the invocation id and handler
/// attached to every line.
#[derive(Debug, Clone)]
pub struct InvocationLogger {
    invocation_id: String,
    handler: &'static str,
}

impl InvocationLogger {
    pub fn new(invocation_id: &InvocationId, handler: &'static str) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            handler,
        }
    }

    pub fn log_start(&self, url: &str) {
        info!(
            invocation_id = %self.invocation_id,
            handler = self.handler,
            url = %url,
            "Invocation started"
        );
    }

    pub fn log_retry(&self, kind: &str, message: &str) {
        warn!(
            invocation_id = %self.invocation_id,
            handler = self.handler,
            kind = %kind,
            "Retryable failure: {}", message
        );
    }

    pub fn log_terminal(&self, kind: &str, message: &str) {
        error!(
            invocation_id = %self.invocation_id,
            handler = self.handler,
            kind = %kind,
            "Terminal failure: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            invocation_id = %self.invocation_id,
            handler = self.handler,
            "Invocation completed: {}", message
        );
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn handler(&self) -> &'static str {
        self.handler
    }

    /// Span carrying the invocation context, for instrumenting futures.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "invocation",
            invocation_id = %self.invocation_id,
            handler = self.handler
        )
    }
}
