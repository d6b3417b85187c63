//! In-memory collaborators for worker tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tubeflow_media::{deliver, DownloadEngine, EngineFailure, EngineParams, EngineResult, ProgressSink};
use tubeflow_models::{OutputRef, PathFilter, ProgressSnapshot};
use tubeflow_queue::{KeyValueSink, QueueError, QueueResult, StoreEntry};
use tubeflow_storage::{collect_files, DirectoryPersister, PersistReport, StorageError, StorageResult};

/// Key-value sink holding the latest value per key.
#[derive(Default)]
pub struct MemorySink {
    values: Mutex<BTreeMap<String, String>>,
    batches: AtomicUsize,
    fail: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.lock().unwrap().keys().cloned().collect()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueSink for MemorySink {
    async fn write_batch(&self, entries: Vec<StoreEntry>) -> QueueResult<()> {
        if self.fail {
            return Err(QueueError::enqueue_failed("sink unavailable"));
        }
        let mut values = self.values.lock().unwrap();
        for entry in entries {
            match entry {
                StoreEntry::Set { key, value } => {
                    values.insert(key, value);
                }
                StoreEntry::HashSet { key, field, value } => {
                    values.insert(format!("{key}#{field}"), value);
                }
            }
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What the fake engine does when called.
#[derive(Clone)]
pub enum Script {
    /// Write these files (relative path, contents) and emit the snapshots.
    Produce {
        files: Vec<(&'static str, &'static str)>,
        snapshots: Vec<ProgressSnapshot>,
    },
    Fail(EngineFailure),
    /// Emit nothing and never finish.
    Hang,
    Info(Value),
}

pub struct FakeEngine {
    script: Script,
    pub calls: AtomicUsize,
    pub last_params: Mutex<Option<EngineParams>>,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    fn called(&self, params: &EngineParams) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    async fn download(
        &self,
        params: &EngineParams,
        _urls: &[String],
        output_root: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> EngineResult<()> {
        self.called(params);
        match &self.script {
            Script::Produce { files, snapshots } => {
                for (relative, contents) in files {
                    let path = output_root.join(relative);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).unwrap();
                    }
                    std::fs::write(path, contents).unwrap();
                }
                for snapshot in snapshots {
                    deliver(progress.as_ref(), snapshot.clone());
                }
                Ok(())
            }
            Script::Fail(failure) => Err(failure.clone()),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Script::Info(_) => Ok(()),
        }
    }

    async fn extract_info(&self, params: &EngineParams, _url: &str) -> EngineResult<Value> {
        self.called(params);
        match &self.script {
            Script::Info(value) => Ok(value.clone()),
            Script::Fail(failure) => Err(failure.clone()),
            _ => Ok(Value::Null),
        }
    }
}

/// Persister that records what it would upload, applying the filter.
#[derive(Default)]
pub struct RecordingPersister {
    pub uploads: Mutex<Vec<(String, Vec<String>)>>,
    pub fail: bool,
    pub reject: bool,
}

impl RecordingPersister {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Refuses every destination up front.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn uploaded(&self) -> Vec<(String, Vec<String>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectoryPersister for RecordingPersister {
    fn check(&self, destination: &OutputRef) -> StorageResult<()> {
        if self.reject {
            return Err(StorageError::invalid_destination(
                destination.to_string(),
                "outside local output root",
            ));
        }
        Ok(())
    }

    async fn persist(
        &self,
        destination: &OutputRef,
        source_dir: &Path,
        filter: Option<&dyn PathFilter>,
    ) -> StorageResult<PersistReport> {
        if self.fail {
            return Err(StorageError::upload_failed("a.mp4", "connection reset"));
        }
        let (files, skipped) = collect_files(source_dir, filter)?;
        let uploaded: Vec<String> = files.iter().map(|f| f.relative.clone()).collect();
        self.uploads
            .lock()
            .unwrap()
            .push((destination.to_string(), uploaded.clone()));
        Ok(PersistReport {
            uploaded,
            skipped,
            bytes: files.iter().map(|f| f.size).sum(),
        })
    }
}
