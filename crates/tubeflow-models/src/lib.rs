//! Shared data models for tubeflow.
//!
//! This crate provides Serde-serializable, validated types for:
//! - Download and extract-info requests
//! - Relative output paths that cannot escape their root
//! - Include/exclude glob filters for persisted files
//! - Engine progress snapshots and their reduced polling view
//! - Bounded extract-info responses

pub mod error;
pub mod filter;
pub mod info;
pub mod invocation;
pub mod path;
pub mod progress;
pub mod request;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use filter::{normalize_path, FilterSpec, IncludeExcludeFilter, PathFilter};
pub use info::{ExtractInfoResponse, FormatInfo};
pub use invocation::InvocationId;
pub use path::SafeRelativePath;
pub use progress::{ProgressSnapshot, ProgressStatus, ReducedProgress};
pub use request::{
    DownloadOptions, DownloadOutput, DownloadRequest, ExtractInfoRequest, OutputRef, OutputTemplate,
    UrlList,
};
