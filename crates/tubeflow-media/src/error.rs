//! Failures raised by the download/extraction engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineFailure>;

/// Transport-layer failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    ConnectionReset,
    Timeout,
    Dns,
    Unavailable,
    IncompleteRead,
    Tls,
    Other,
}

/// Why the engine decided the content cannot be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    UnsupportedUrl,
    Unavailable,
    Private,
    LoginRequired,
    GeoRestricted,
    FormatUnavailable,
    Parse,
    Postprocess,
    Other,
}

/// OS-level socket error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsErrorKind {
    NetworkUnreachable,
    ConnectionRefused,
    ConnectionReset,
    HostUnreachable,
    Other,
}

impl OsErrorKind {
    /// Map a Linux errno to a category.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            101 => Self::NetworkUnreachable,
            104 => Self::ConnectionReset,
            111 => Self::ConnectionRefused,
            113 => Self::HostUnreachable,
            _ => Self::Other,
        }
    }

    /// Whether this is a connectivity fault rather than a local one.
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// A typed engine failure, possibly wrapping the cause that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineFailure {
    #[error("{message}")]
    Transport {
        kind: TransportKind,
        message: String,
        #[source]
        cause: Option<Box<EngineFailure>>,
    },

    #[error("HTTP Error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{message}")]
    Extraction {
        kind: ExtractionKind,
        message: String,
        #[source]
        cause: Option<Box<EngineFailure>>,
    },

    #[error("{message}")]
    Os {
        kind: OsErrorKind,
        errno: Option<i32>,
        message: String,
    },

    #[error("{message}")]
    Download {
        message: String,
        #[source]
        cause: Option<Box<EngineFailure>>,
    },

    #[error("{type_name}: {message}")]
    Other {
        type_name: String,
        message: String,
        #[source]
        cause: Option<Box<EngineFailure>>,
    },
}

impl EngineFailure {
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn extraction(kind: ExtractionKind, message: impl Into<String>) -> Self {
        Self::Extraction {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn os(errno: i32, message: impl Into<String>) -> Self {
        Self::Os {
            kind: OsErrorKind::from_errno(errno),
            errno: Some(errno),
            message: message.into(),
        }
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
            cause: None,
        }
    }

    pub fn other(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            type_name: type_name.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an inner cause. Leaf variants ignore it.
    pub fn with_cause(mut self, inner: EngineFailure) -> Self {
        match &mut self {
            Self::Transport { cause, .. }
            | Self::Extraction { cause, .. }
            | Self::Download { cause, .. }
            | Self::Other { cause, .. } => *cause = Some(Box::new(inner)),
            Self::Http { .. } | Self::Os { .. } => {}
        }
        self
    }

    /// The directly wrapped cause, if any.
    pub fn cause(&self) -> Option<&EngineFailure> {
        match self {
            Self::Transport { cause, .. }
            | Self::Extraction { cause, .. }
            | Self::Download { cause, .. }
            | Self::Other { cause, .. } => cause.as_deref(),
            Self::Http { .. } | Self::Os { .. } => None,
        }
    }

    /// Follow the cause chain to its end.
    pub fn innermost(&self) -> &EngineFailure {
        let mut current = self;
        while let Some(inner) = current.cause() {
            current = inner;
        }
        current
    }

    /// Short type label used in logs and terminal messages.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Transport { .. } => "TransportError",
            Self::Http { .. } => "HTTPError",
            Self::Extraction {
                kind: ExtractionKind::UnsupportedUrl,
                ..
            } => "UnsupportedError",
            Self::Extraction {
                kind: ExtractionKind::Postprocess,
                ..
            } => "PostProcessingError",
            Self::Extraction { .. } => "ExtractorError",
            Self::Os { .. } => "OSError",
            Self::Download { .. } => "DownloadError",
            Self::Other { type_name, .. } => type_name,
        }
    }

    /// The message without any type prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. }
            | Self::Http { message, .. }
            | Self::Extraction { message, .. }
            | Self::Os { message, .. }
            | Self::Download { message, .. }
            | Self::Other { message, .. } => message,
        }
    }

    /// Iterate this failure and every wrapped cause, outermost first.
    pub fn chain(&self) -> Chain<'_> {
        Chain {
            next: Some(self),
        }
    }
}

/// Iterator over a failure's cause chain.
pub struct Chain<'a> {
    next: Option<&'a EngineFailure>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a EngineFailure;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_follows_chain() {
        let failure = EngineFailure::download("unable to download video data")
            .with_cause(
                EngineFailure::transport(TransportKind::Other, "urlopen error")
                    .with_cause(EngineFailure::os(111, "Connection refused")),
            );

        assert_eq!(failure.chain().count(), 3);
        assert!(matches!(
            failure.innermost(),
            EngineFailure::Os {
                kind: OsErrorKind::ConnectionRefused,
                ..
            }
        ));
    }

    #[test]
    fn test_leaf_ignores_cause() {
        let failure = EngineFailure::http(404, "Not Found").with_cause(EngineFailure::download("x"));
        assert!(failure.cause().is_none());
        assert_eq!(failure.to_string(), "HTTP Error 404: Not Found");
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(OsErrorKind::from_errno(101), OsErrorKind::NetworkUnreachable);
        assert_eq!(OsErrorKind::from_errno(113), OsErrorKind::HostUnreachable);
        assert!(!OsErrorKind::from_errno(28).is_connectivity());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(
            EngineFailure::extraction(ExtractionKind::UnsupportedUrl, "x").type_name(),
            "UnsupportedError"
        );
        assert_eq!(EngineFailure::other("KeyError", "'id'").type_name(), "KeyError");
        assert_eq!(EngineFailure::other("KeyError", "'id'").to_string(), "KeyError: 'id'");
    }
}
