//! Retryable vs. terminal decisions for engine failures.
//!
//! Rules are checked in order against the innermost cause, first match wins:
//!
//! 1. transport failures are retryable
//! 2. HTTP 408, 429 and 5xx other than 501 are retryable; other statuses are terminal
//! 3. extraction failures are terminal
//! 4. OS connectivity errors are retryable
//! 5. anything else is terminal

use serde::{Deserialize, Serialize};

use crate::error::EngineFailure;

/// Broad category of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Http,
    Extraction,
    Os,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Http => "http",
            Self::Extraction => "extraction",
            Self::Os => "os",
            Self::Unknown => "unknown",
        }
    }
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub retryable: bool,
    pub kind: FailureKind,
    /// HTTP status, when the innermost cause carried one.
    pub status: Option<u16>,
    /// Human-readable message taken from the innermost cause.
    pub message: String,
    pub cause: EngineFailure,
}

/// HTTP statuses worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    match status {
        408 | 429 => true,
        501 => false,
        500..=599 => true,
        _ => false,
    }
}

/// Stateless failure classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, failure: &EngineFailure) -> Classification {
        let innermost = failure.innermost();

        let (retryable, kind, status) = match innermost {
            EngineFailure::Transport { .. } => (true, FailureKind::Transport, None),
            EngineFailure::Http { status, .. } => {
                (is_retryable_status(*status), FailureKind::Http, Some(*status))
            }
            EngineFailure::Extraction { .. } => (false, FailureKind::Extraction, None),
            EngineFailure::Os { kind, .. } if kind.is_connectivity() => {
                (true, FailureKind::Os, None)
            }
            _ => (false, FailureKind::Unknown, None),
        };

        Classification {
            retryable,
            kind,
            status,
            message: describe(innermost, kind),
            cause: failure.clone(),
        }
    }
}

fn describe(innermost: &EngineFailure, kind: FailureKind) -> String {
    match innermost {
        // Unknown failures keep their type for diagnosis.
        failure if kind == FailureKind::Unknown => {
            format!("{}: {}", failure.type_name(), failure.message())
        }
        failure @ EngineFailure::Http { .. } => failure.to_string(),
        failure => failure.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionKind, OsErrorKind, TransportKind};

    fn classify(failure: EngineFailure) -> Classification {
        ErrorClassifier::new().classify(&failure)
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504, 507, 599] {
            let c = classify(EngineFailure::http(status, "x"));
            assert!(c.retryable, "{status} should be retryable");
            assert_eq!(c.status, Some(status));
            assert_eq!(c.kind, FailureKind::Http);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        for status in (400..500).filter(|s| *s != 408 && *s != 429).chain([501]) {
            assert!(
                !classify(EngineFailure::http(status, "x")).retryable,
                "{status} should be terminal"
            );
        }
    }

    #[test]
    fn test_transport_failures_retryable() {
        for kind in [
            TransportKind::ConnectionReset,
            TransportKind::Timeout,
            TransportKind::Dns,
            TransportKind::Unavailable,
            TransportKind::IncompleteRead,
        ] {
            let c = classify(EngineFailure::transport(kind, "boom"));
            assert!(c.retryable);
            assert_eq!(c.kind, FailureKind::Transport);
            assert_eq!(c.status, None);
        }
    }

    #[test]
    fn test_extraction_failures_terminal() {
        for kind in [
            ExtractionKind::UnsupportedUrl,
            ExtractionKind::Unavailable,
            ExtractionKind::Private,
            ExtractionKind::Parse,
            ExtractionKind::Postprocess,
        ] {
            let c = classify(EngineFailure::extraction(kind, "nope"));
            assert!(!c.retryable);
            assert_eq!(c.kind, FailureKind::Extraction);
        }
    }

    #[test]
    fn test_os_connectivity() {
        for errno in [101, 104, 111, 113] {
            assert!(classify(EngineFailure::os(errno, "x")).retryable);
        }
        // ENOSPC is local, not connectivity
        let c = classify(EngineFailure::os(28, "No space left on device"));
        assert!(!c.retryable);
        assert_eq!(c.kind, FailureKind::Unknown);
        assert_eq!(c.message, "OSError: No space left on device");
        assert!(matches!(
            c.cause,
            EngineFailure::Os {
                kind: OsErrorKind::Other,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_is_terminal_and_keeps_type() {
        let c = classify(EngineFailure::other("KeyError", "'formats'"));
        assert!(!c.retryable);
        assert_eq!(c.kind, FailureKind::Unknown);
        assert_eq!(c.message, "KeyError: 'formats'");
    }

    #[test]
    fn test_innermost_cause_decides() {
        // Extractor wrapper around a transient server error.
        let failure = EngineFailure::extraction(ExtractionKind::Other, "Unable to download webpage")
            .with_cause(EngineFailure::http(503, "Service Unavailable"));
        let c = classify(failure.clone());
        assert!(c.retryable);
        assert_eq!(c.status, Some(503));
        assert_eq!(c.message, "HTTP Error 503: Service Unavailable");
        assert_eq!(c.cause, failure);

        // Download wrapper around a client error.
        let c = classify(
            EngineFailure::download("unable to download video data")
                .with_cause(EngineFailure::http(403, "Forbidden")),
        );
        assert!(!c.retryable);
        assert_eq!(c.message, "HTTP Error 403: Forbidden");
    }

    #[test]
    fn test_bare_wrapper_is_unknown() {
        let c = classify(EngineFailure::download("fragment 3 not found"));
        assert!(!c.retryable);
        assert_eq!(c.message, "DownloadError: fragment 3 not found");
    }
}
