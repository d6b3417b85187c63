//! Persist a scratch directory to its destination.
//!
//! A destination is an [`OutputRef`]: `s3://bucket/prefix`, `file:///dir`,
//! or a relative path resolved against the configured default location.
//! Local destinations never leave the configured root.
//! Only files accepted by the optional [`PathFilter`] are written.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};
use tubeflow_models::{normalize_path, OutputRef, PathFilter};
use walkdir::WalkDir;

use crate::client::{S3Client, S3Config};
use crate::error::{StorageError, StorageResult};

/// What a persist call wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    /// Relative paths written, in walk order.
    pub uploaded: Vec<String>,
    /// Relative paths rejected by the filter.
    pub skipped: Vec<String>,
    /// Total bytes written.
    pub bytes: u64,
}

/// Uploads filter-accepted files under a directory to a destination.
#[async_trait]
pub trait DirectoryPersister: Send + Sync {
    /// Resolve `destination` without writing anything.
    fn check(&self, _destination: &OutputRef) -> StorageResult<()> {
        Ok(())
    }

    async fn persist(
        &self,
        destination: &OutputRef,
        source_dir: &Path,
        filter: Option<&dyn PathFilter>,
    ) -> StorageResult<PersistReport>;
}

/// A regular file found under the source directory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Slash-separated path relative to the source directory.
    pub relative: String,
    pub size: u64,
}

/// Walk `source_dir` and split its files into accepted and skipped.
///
/// Scratch directories hold a handful of files, so the walk is synchronous.
pub fn collect_files(
    source_dir: &Path,
    filter: Option<&dyn PathFilter>,
) -> StorageResult<(Vec<SourceFile>, Vec<String>)> {
    let mut accepted = Vec::new();
    let mut skipped = Vec::new();

    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| StorageError::WalkFailed {
            path: source_dir.display().to_string(),
            message: e.to_string(),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or_else(|_| entry.path());
        let relative = normalize_path(relative_path);

        if filter.is_some_and(|f| !f.matches(Path::new(&relative))) {
            skipped.push(relative);
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        accepted.push(SourceFile {
            path: entry.into_path(),
            relative,
            size,
        });
    }

    Ok((accepted, skipped))
}

/// Content type for an uploaded file, from its extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" => "audio/opus",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "json" => "application/json",
        "vtt" => "text/vtt",
        "srt" => "application/x-subrip",
        "ass" | "ssa" => "text/x-ssa",
        "txt" | "description" => "text/plain; charset=utf-8",
        "url" | "webloc" | "desktop" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Join a key prefix and a relative path with exactly one `/`.
pub fn join_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let relative = relative.trim_start_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{prefix}/{relative}")
    }
}

/// Persists to an S3-compatible bucket.
#[derive(Clone)]
pub struct S3DirectoryPersister {
    client: S3Client,
    default_bucket: Option<String>,
    default_prefix: String,
    concurrency: usize,
}

impl S3DirectoryPersister {
    pub fn new(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            default_bucket: config.default_bucket.clone(),
            default_prefix: config.default_prefix.clone(),
            concurrency: config.upload_concurrency.max(1),
        }
    }

    pub async fn from_config(config: &S3Config) -> StorageResult<Self> {
        let client = S3Client::new(config).await?;
        Ok(Self::new(client, config))
    }

    /// Bucket and key prefix for a destination.
    pub fn resolve(&self, destination: &OutputRef) -> StorageResult<(String, String)> {
        match destination {
            OutputRef::Url(url) if url.scheme() == "s3" => {
                let bucket = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| StorageError::invalid_destination(url.as_str(), "missing bucket"))?;
                Ok((bucket.to_string(), url.path().trim_matches('/').to_string()))
            }
            OutputRef::Url(url) => Err(StorageError::UnsupportedDestination(url.to_string())),
            OutputRef::Path(path) => {
                let bucket = self.default_bucket.clone().ok_or_else(|| {
                    StorageError::config_error("relative destination requires S3_BUCKET")
                })?;
                Ok((bucket, join_key(&self.default_prefix, &path.to_posix())))
            }
        }
    }
}

#[async_trait]
impl DirectoryPersister for S3DirectoryPersister {
    fn check(&self, destination: &OutputRef) -> StorageResult<()> {
        self.resolve(destination).map(|_| ())
    }

    async fn persist(
        &self,
        destination: &OutputRef,
        source_dir: &Path,
        filter: Option<&dyn PathFilter>,
    ) -> StorageResult<PersistReport> {
        let (bucket, prefix) = self.resolve(destination)?;
        let (files, skipped) = collect_files(source_dir, filter)?;

        debug!(
            bucket = %bucket,
            prefix = %prefix,
            files = files.len(),
            skipped = skipped.len(),
            "Uploading directory"
        );

        let uploaded: Vec<(String, u64)> = stream::iter(files)
            .map(|file| {
                let key = join_key(&prefix, &file.relative);
                let bucket = &bucket;
                async move {
                    self.client
                        .upload_file(bucket, &key, &file.path, content_type_for(&file.relative))
                        .await?;
                    Ok::<_, StorageError>((file.relative, file.size))
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let report = build_report(uploaded, skipped);
        info!(
            destination = %destination,
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            bytes = report.bytes,
            "Persisted directory to S3"
        );
        Ok(report)
    }
}

fn build_report(uploaded: Vec<(String, u64)>, skipped: Vec<String>) -> PersistReport {
    let bytes = uploaded.iter().map(|(_, size)| size).sum();
    PersistReport {
        uploaded: uploaded.into_iter().map(|(relative, _)| relative).collect(),
        skipped,
        bytes,
    }
}

/// Persists by copying into a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalDirectoryPersister {
    root: PathBuf,
}

impl LocalDirectoryPersister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target directory for a destination.
    ///
    /// A `file://` URL must name a directory at or below the root.
    pub fn resolve(&self, destination: &OutputRef) -> StorageResult<PathBuf> {
        match destination {
            OutputRef::Url(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| StorageError::invalid_destination(url.as_str(), "not a local path"))?;
                self.confine(url.as_str(), path)
            }
            OutputRef::Url(url) => Err(StorageError::UnsupportedDestination(url.to_string())),
            OutputRef::Path(path) => Ok(path.resolve_under(&self.root)),
        }
    }

    fn confine(&self, destination: &str, path: PathBuf) -> StorageResult<PathBuf> {
        let root = std::path::absolute(&self.root)
            .map_err(|e| StorageError::invalid_destination(destination, e.to_string()))?;
        let climbs = path.components().any(|c| matches!(c, Component::ParentDir));
        if climbs || !path.starts_with(&root) {
            return Err(StorageError::invalid_destination(
                destination,
                format!("outside local output root {}", root.display()),
            ));
        }
        Ok(path)
    }
}

#[async_trait]
impl DirectoryPersister for LocalDirectoryPersister {
    fn check(&self, destination: &OutputRef) -> StorageResult<()> {
        self.resolve(destination).map(|_| ())
    }

    async fn persist(
        &self,
        destination: &OutputRef,
        source_dir: &Path,
        filter: Option<&dyn PathFilter>,
    ) -> StorageResult<PersistReport> {
        let target = self.resolve(destination)?;
        let (files, skipped) = collect_files(source_dir, filter)?;

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let dest = target.join(&file.relative);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let size = tokio::fs::copy(&file.path, &dest).await?;
            uploaded.push((file.relative, size));
        }

        let report = build_report(uploaded, skipped);
        info!(
            destination = %target.display(),
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            bytes = report.bytes,
            "Persisted directory locally"
        );
        Ok(report)
    }
}

/// Routes each destination to the persister that can serve it.
///
/// `s3://` goes to S3, `file://` to the local persister, and relative paths
/// to S3 when configured, otherwise to the local root.
#[derive(Clone, Default)]
pub struct RoutingPersister {
    s3: Option<S3DirectoryPersister>,
    local: Option<LocalDirectoryPersister>,
}

impl RoutingPersister {
    pub fn new(s3: Option<S3DirectoryPersister>, local: Option<LocalDirectoryPersister>) -> Self {
        Self { s3, local }
    }

    fn route(&self, destination: &OutputRef) -> StorageResult<&dyn DirectoryPersister> {
        let unsupported = || StorageError::UnsupportedDestination(destination.to_string());

        match destination {
            OutputRef::Url(url) if url.scheme() == "s3" => self
                .s3
                .as_ref()
                .map(|p| p as &dyn DirectoryPersister)
                .ok_or_else(unsupported),
            OutputRef::Url(url) if url.scheme() == "file" => self
                .local
                .as_ref()
                .map(|p| p as &dyn DirectoryPersister)
                .ok_or_else(unsupported),
            OutputRef::Url(_) => Err(unsupported()),
            OutputRef::Path(_) => match (&self.s3, &self.local) {
                (Some(s3), _) => Ok(s3 as &dyn DirectoryPersister),
                (None, Some(local)) => Ok(local as &dyn DirectoryPersister),
                (None, None) => Err(unsupported()),
            },
        }
    }
}

#[async_trait]
impl DirectoryPersister for RoutingPersister {
    fn check(&self, destination: &OutputRef) -> StorageResult<()> {
        self.route(destination)?.check(destination)
    }

    async fn persist(
        &self,
        destination: &OutputRef,
        source_dir: &Path,
        filter: Option<&dyn PathFilter>,
    ) -> StorageResult<PersistReport> {
        self.route(destination)?
            .persist(destination, source_dir, filter)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubeflow_models::IncludeExcludeFilter;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_collect_files_applies_filter() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.mp4", "video");
        write(dir.path(), "b.pdf", "doc");
        write(dir.path(), "nested/c.pdf", "doc");
        write(dir.path(), "nested/d.info.json", "{}");

        let filter = IncludeExcludeFilter::excluding(["*.pdf"]).unwrap();
        let (files, skipped) = collect_files(dir.path(), Some(&filter)).unwrap();

        let accepted: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(accepted, ["a.mp4", "nested/d.info.json"]);
        assert_eq!(skipped, ["b.pdf", "nested/c.pdf"]);
        assert_eq!(files[0].size, 5);
    }

    #[test]
    fn test_collect_without_filter() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x/y/z.bin", "1");
        let (files, skipped) = collect_files(dir.path(), None).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, "x/y/z.bin");
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("a/b.MP4"), "video/mp4");
        assert_eq!(content_type_for("x.info.json"), "application/json");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "a.mp4"), "a.mp4");
        assert_eq!(join_key("videoid/", "a.mp4"), "videoid/a.mp4");
        assert_eq!(join_key("/p/q/", "/a.mp4"), "p/q/a.mp4");
    }

    #[tokio::test]
    async fn test_local_persist_relative_destination() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        write(src.path(), "a.mp4", "video");
        write(src.path(), "b.pdf", "doc");

        let persister = LocalDirectoryPersister::new(root.path());
        let filter = IncludeExcludeFilter::excluding(["*.pdf"]).unwrap();
        let destination = OutputRef::parse("videos/abc").unwrap();

        let report = persister
            .persist(&destination, src.path(), Some(&filter))
            .await
            .unwrap();

        assert_eq!(report.uploaded, ["a.mp4"]);
        assert_eq!(report.skipped, ["b.pdf"]);
        assert_eq!(report.bytes, 5);
        assert!(root.path().join("videos/abc/a.mp4").exists());
        assert!(!root.path().join("videos/abc/b.pdf").exists());
    }

    #[tokio::test]
    async fn test_local_persist_file_url() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        write(src.path(), "sub/a.vtt", "WEBVTT");

        let target = root.path().join("media");
        let url = format!("file://{}", target.display());
        let destination = OutputRef::parse(&url).unwrap();
        let report = LocalDirectoryPersister::new(root.path())
            .persist(&destination, src.path(), None)
            .await
            .unwrap();

        assert_eq!(report.uploaded, ["sub/a.vtt"]);
        assert!(target.join("sub/a.vtt").exists());
    }

    #[tokio::test]
    async fn test_file_url_outside_root_is_rejected() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        write(src.path(), "a.mp4", "video");
        let persister = LocalDirectoryPersister::new(root.path());

        for url in [
            format!("file://{}", elsewhere.path().display()),
            format!("file://{}/../escaped", root.path().display()),
            "file:///etc".to_string(),
        ] {
            let destination = OutputRef::parse(&url).unwrap();
            let err = persister.check(&destination).unwrap_err();
            assert!(err.is_destination_error(), "{url}: {err}");
            assert!(persister.persist(&destination, src.path(), None).await.is_err());
        }

        assert!(std::fs::read_dir(elsewhere.path()).unwrap().next().is_none());
        assert!(!root.path().parent().unwrap().join("escaped").exists());
    }

    #[tokio::test]
    async fn test_routing_without_s3() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let router = RoutingPersister::new(None, Some(LocalDirectoryPersister::new(root.path())));

        let s3 = OutputRef::parse("s3://bucket/prefix").unwrap();
        assert!(matches!(
            router.persist(&s3, src.path(), None).await,
            Err(StorageError::UnsupportedDestination(_))
        ));

        let relative = OutputRef::parse("out").unwrap();
        assert!(router.persist(&relative, src.path(), None).await.is_ok());

        let gs = OutputRef::Url(url::Url::parse("gs://bucket/x").unwrap());
        assert!(matches!(
            router.check(&gs),
            Err(StorageError::UnsupportedDestination(_))
        ));
    }
}
