//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Unsupported destination: {0}")]
    UnsupportedDestination(String),

    #[error("Invalid destination {destination}: {reason}")]
    InvalidDestination { destination: String, reason: String },

    #[error("Upload failed for {key}: {message}")]
    UploadFailed { key: String, message: String },

    #[error("Failed to walk {path}: {message}")]
    WalkFailed { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_destination(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDestination {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    /// The destination itself is at fault; another attempt cannot succeed.
    pub fn is_destination_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedDestination(_) | Self::InvalidDestination { .. }
        )
    }

    pub fn upload_failed(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UploadFailed {
            key: key.into(),
            message: message.into(),
        }
    }
}
