//! Output persistence for downloaded media.
//!
//! This crate provides:
//! - An S3-compatible client (AWS, MinIO, R2)
//! - The [`DirectoryPersister`] capability with S3 and local implementations
//! - Scheme-based routing between them

pub mod client;
pub mod error;
pub mod persister;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use persister::{
    collect_files, content_type_for, join_key, DirectoryPersister, LocalDirectoryPersister,
    PersistReport, RoutingPersister, S3DirectoryPersister, SourceFile,
};
