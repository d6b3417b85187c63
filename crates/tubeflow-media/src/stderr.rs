//! Turn yt-dlp `ERROR:` lines into typed failures.
//!
//! The engine reports failures as text such as
//! `ERROR: [youtube] abc: Unable to download webpage: HTTP Error 503: Service Unavailable (caused by ...)`.
//! The extractor prefix decides the wrapper, the message body decides the cause.

use std::process::ExitStatus;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{EngineFailure, ExtractionKind, TransportKind};

const ERROR_PREFIX: &str = "ERROR:";

static HTTP_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HTTP Error (\d{3})(?::\s*([^()]*))?").expect("static regex"));

static ERRNO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Errno (-?\d+)\]\s*([^>'()]*)").expect("static regex"));

static EXTRACTOR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([\w:.-]+)\]\s*(.*)$").expect("static regex"));

/// Build a failure from the engine's stderr after a non-zero exit.
pub fn failure_from_stderr(stderr: &str, status: ExitStatus) -> EngineFailure {
    match last_error_line(stderr) {
        Some(line) => parse_error_line(line),
        None => {
            let tail = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("no output");
            EngineFailure::other("EngineExit", format!("yt-dlp exited with {status}: {tail}"))
        }
    }
}

/// The last `ERROR:` line, which describes the failure that ended the run.
pub fn last_error_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with(ERROR_PREFIX))
}

/// Parse one `ERROR:` line.
pub fn parse_error_line(line: &str) -> EngineFailure {
    let body = line
        .trim()
        .strip_prefix(ERROR_PREFIX)
        .unwrap_or(line)
        .trim();

    let (extractor, message) = match EXTRACTOR_PREFIX.captures(body) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str()),
            caps.get(2).map_or(body, |m| m.as_str()),
        ),
        None => (None, body),
    };

    let cause = parse_cause(message);
    let lower = message.to_ascii_lowercase();

    if let Some(kind) = extraction_kind(&lower, extractor.is_some()) {
        let failure = EngineFailure::extraction(kind, clean_message(message));
        return match cause {
            Some(cause) => failure.with_cause(cause),
            None => failure,
        };
    }

    if lower.starts_with("unable to download") || lower.contains("fragment") || cause.is_some() {
        let failure = EngineFailure::download(clean_message(message));
        return match cause {
            Some(cause) => failure.with_cause(cause),
            None => failure,
        };
    }

    EngineFailure::other("DownloadError", clean_message(message))
}

/// Identify the leaf cause carried inside a message, if any.
fn parse_cause(message: &str) -> Option<EngineFailure> {
    if let Some(caps) = HTTP_STATUS.captures(message) {
        if let Some(status) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
            let reason = caps.get(2).map_or("", |m| m.as_str().trim());
            return Some(EngineFailure::http(status, reason));
        }
    }

    let lower = message.to_ascii_lowercase();

    if let Some(caps) = ERRNO.captures(message) {
        if let Some(errno) = caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok()) {
            let reason = caps.get(2).map_or("", |m| m.as_str().trim()).to_string();
            return Some(match errno {
                // getaddrinfo failures
                -2 | -3 | -5 => EngineFailure::transport(TransportKind::Dns, reason),
                110 => EngineFailure::transport(TransportKind::Timeout, reason),
                _ => EngineFailure::os(errno, reason),
            });
        }
    }

    let transport = [
        ("timed out", TransportKind::Timeout),
        ("timeout", TransportKind::Timeout),
        ("name resolution", TransportKind::Dns),
        ("name or service not known", TransportKind::Dns),
        ("nodename nor servname", TransportKind::Dns),
        ("getaddrinfo failed", TransportKind::Dns),
        ("connection reset", TransportKind::ConnectionReset),
        ("connection aborted", TransportKind::ConnectionReset),
        ("remote end closed connection", TransportKind::ConnectionReset),
        ("incompleteread", TransportKind::IncompleteRead),
        ("content too short", TransportKind::IncompleteRead),
        ("did not get any data blocks", TransportKind::IncompleteRead),
        ("temporarily unavailable", TransportKind::Unavailable),
        ("temporary failure", TransportKind::Unavailable),
        ("service unavailable", TransportKind::Unavailable),
        ("[ssl", TransportKind::Tls),
        ("ssl:", TransportKind::Tls),
    ];
    if let Some((_, kind)) = transport.iter().find(|(needle, _)| lower.contains(needle)) {
        return Some(EngineFailure::transport(*kind, clean_message(message)));
    }

    let os = [
        ("network is unreachable", 101),
        ("connection refused", 111),
        ("no route to host", 113),
    ];
    os.iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, errno)| EngineFailure::os(*errno, clean_message(message)))
}

/// Decide whether the engine rejected the content itself.
fn extraction_kind(lower: &str, from_extractor: bool) -> Option<ExtractionKind> {
    let rules = [
        ("unsupported url", ExtractionKind::UnsupportedUrl),
        ("is not a valid url", ExtractionKind::UnsupportedUrl),
        ("private video", ExtractionKind::Private),
        ("video is private", ExtractionKind::Private),
        ("sign in to confirm", ExtractionKind::LoginRequired),
        ("login required", ExtractionKind::LoginRequired),
        ("requires authentication", ExtractionKind::LoginRequired),
        ("members-only", ExtractionKind::LoginRequired),
        ("not available in your country", ExtractionKind::GeoRestricted),
        ("geo restricted", ExtractionKind::GeoRestricted),
        ("geo-restricted", ExtractionKind::GeoRestricted),
        ("requested format is not available", ExtractionKind::FormatUnavailable),
        ("video unavailable", ExtractionKind::Unavailable),
        ("this video is unavailable", ExtractionKind::Unavailable),
        ("has been removed", ExtractionKind::Unavailable),
        ("does not exist", ExtractionKind::Unavailable),
        ("unable to extract", ExtractionKind::Parse),
        ("failed to parse", ExtractionKind::Parse),
        ("jsondecodeerror", ExtractionKind::Parse),
        ("postprocessing:", ExtractionKind::Postprocess),
    ];

    if let Some((_, kind)) = rules.iter().find(|(needle, _)| lower.contains(needle)) {
        return Some(*kind);
    }

    from_extractor.then_some(ExtractionKind::Other)
}

/// Drop the engine's trailing bug-report boilerplate and `(caused by ...)` detail.
fn clean_message(message: &str) -> String {
    let mut cleaned = message;
    for marker in ["; please report this issue", " (caused by", "; Confirm you are"] {
        if let Some(idx) = cleaned.find(marker) {
            cleaned = &cleaned[..idx];
        }
    }
    cleaned.trim().trim_end_matches(';').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClassifier;
    use crate::error::OsErrorKind;

    fn retryable(line: &str) -> bool {
        ErrorClassifier::new().classify(&parse_error_line(line)).retryable
    }

    #[test]
    fn test_extractor_http_error() {
        let failure = parse_error_line(
            "ERROR: [youtube] abc123: Unable to download webpage: HTTP Error 503: Service Unavailable (caused by <HTTPError 503: Service Unavailable>)",
        );
        assert!(matches!(
            failure,
            EngineFailure::Extraction {
                kind: ExtractionKind::Other,
                ..
            }
        ));
        assert_eq!(failure.innermost(), &EngineFailure::http(503, "Service Unavailable"));
        assert!(retryable(
            "ERROR: [youtube] abc123: Unable to download webpage: HTTP Error 503: Service Unavailable"
        ));
    }

    #[test]
    fn test_download_http_error() {
        let failure = parse_error_line("ERROR: unable to download video data: HTTP Error 403: Forbidden");
        assert!(matches!(failure, EngineFailure::Download { .. }));
        assert_eq!(failure.innermost(), &EngineFailure::http(403, "Forbidden"));
        assert!(!retryable("ERROR: unable to download video data: HTTP Error 403: Forbidden"));
        assert!(retryable("ERROR: unable to download video data: HTTP Error 429: Too Many Requests"));
    }

    #[test]
    fn test_unsupported_url() {
        let failure = parse_error_line("ERROR: Unsupported URL: https://example.com/page");
        assert!(matches!(
            failure,
            EngineFailure::Extraction {
                kind: ExtractionKind::UnsupportedUrl,
                cause: None,
                ..
            }
        ));
        assert!(!retryable("ERROR: Unsupported URL: https://example.com/page"));
    }

    #[test]
    fn test_unavailable_video() {
        assert!(!retryable("ERROR: [youtube] dQw4w9WgXcX: Video unavailable"));
        assert!(!retryable(
            "ERROR: [youtube] abc: Private video. Sign in if you've been granted access to this video"
        ));
        assert!(!retryable("ERROR: [youtube] abc: Requested format is not available"));
    }

    #[test]
    fn test_dns_failure() {
        let line = "ERROR: [youtube] abc: Unable to download API page: <urlopen error [Errno -3] Temporary failure in name resolution> (caused by TransportError('<urlopen error [Errno -3] Temporary failure in name resolution>'))";
        let failure = parse_error_line(line);
        assert!(matches!(
            failure.innermost(),
            EngineFailure::Transport {
                kind: TransportKind::Dns,
                ..
            }
        ));
        assert!(retryable(line));
    }

    #[test]
    fn test_os_errors() {
        let failure = parse_error_line(
            "ERROR: unable to download video data: <urlopen error [Errno 111] Connection refused>",
        );
        assert!(matches!(
            failure.innermost(),
            EngineFailure::Os {
                kind: OsErrorKind::ConnectionRefused,
                errno: Some(111),
                ..
            }
        ));
        assert!(retryable("ERROR: [Errno 101] Network is unreachable"));
        assert!(!retryable("ERROR: [Errno 28] No space left on device"));
    }

    #[test]
    fn test_transport_keywords() {
        assert!(retryable("ERROR: Read timed out."));
        assert!(retryable("ERROR: unable to download video data: ('Connection aborted.', ConnectionResetError(104, 'Connection reset by peer'))"));
        assert!(retryable("ERROR: Did not get any data blocks"));
    }

    #[test]
    fn test_unknown_error() {
        let failure = parse_error_line("ERROR: something nobody expected");
        assert_eq!(failure, EngineFailure::other("DownloadError", "something nobody expected"));
        assert!(!retryable("ERROR: something nobody expected"));
    }

    #[test]
    fn test_last_error_line_wins() {
        let stderr = "[youtube] abc: Downloading webpage\nWARNING: falling back\nERROR: first\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(last_error_line(stderr), Some("ERROR: [youtube] abc: Video unavailable"));
        assert_eq!(last_error_line("[info] nothing wrong"), None);
    }

    #[test]
    fn test_clean_message() {
        assert_eq!(
            clean_message("Unable to extract data; please report this issue on https://github.com/yt-dlp/yt-dlp/issues"),
            "Unable to extract data"
        );
    }
}
