//! Download/extraction engine adapter.
//!
//! This crate provides:
//! - Capability traits for the engine and its progress sink
//! - Typed engine parameters with a defaults < request < overrides merge
//! - A yt-dlp implementation driven through `tokio::process`
//! - Typed engine failures parsed from yt-dlp stderr
//! - The retryable/terminal failure classifier

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod params;
pub mod stderr;
pub mod ytdlp;

pub use classifier::{is_retryable_status, Classification, ErrorClassifier, FailureKind};
pub use config::{EngineConfig, EngineConfigError};
pub use engine::{deliver, DownloadEngine, ProgressSink};
pub use error::{EngineFailure, EngineResult, ExtractionKind, OsErrorKind, TransportKind};
pub use params::EngineParams;
pub use ytdlp::{parse_progress_line, YtDlpEngine};
