//! Progress fan-out to the key-value store.
//!
//! Each snapshot is written under every identifier known for the invocation:
//! the invocation id, the source URL(s), and the content id once the engine
//! resolved it. Per identifier there is a full entry (`info`), a reduced
//! entry (`progress`) and, when the snapshot names a file, a per-file byte
//! count in the `downloaded-bytes` hash.
//!
//! The engine's read loop only pushes into a channel. A single writer task
//! per invocation drains it in order, so a slow store never stalls the
//! download and snapshots of one invocation are never reordered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tubeflow_media::ProgressSink;
use tubeflow_models::{InvocationId, ProgressSnapshot};
use tubeflow_queue::{Entity, IdentifierType, KeyValueSink, ProgressKeys, StoreEntry};

use crate::metrics;
use crate::retry::FailureTracker;

/// Consecutive write failures logged before suppression.
const LOGGED_WRITE_FAILURES: u32 = 3;

/// Builds and writes progress entries for snapshots.
#[derive(Clone)]
pub struct ProgressTracker {
    sink: Arc<dyn KeyValueSink>,
    keys: ProgressKeys,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn KeyValueSink>, keys: ProgressKeys) -> Self {
        Self { sink, keys }
    }

    pub fn keys(&self) -> &ProgressKeys {
        &self.keys
    }

    /// Every `(identifier type, value)` a snapshot is stored under.
    ///
    /// When the snapshot's metadata names one of the request URLs only that
    /// URL is used, otherwise all request URLs are.
    pub fn identifiers<'a>(
        invocation_id: &'a InvocationId,
        urls: &'a [String],
        snapshot: &'a ProgressSnapshot,
    ) -> Vec<(IdentifierType, &'a str)> {
        let mut identifiers = vec![(IdentifierType::InvocationId, invocation_id.as_str())];

        match snapshot.source_url() {
            Some(source) if urls.iter().any(|url| url == source) => {
                identifiers.push((IdentifierType::Url, source));
            }
            _ => identifiers.extend(urls.iter().map(|url| (IdentifierType::Url, url.as_str()))),
        }

        if let Some(content_id) = snapshot.content_id() {
            identifiers.push((IdentifierType::ContentId, content_id));
        }

        identifiers
    }

    /// The batch of writes for one snapshot.
    pub fn entries(
        &self,
        invocation_id: &InvocationId,
        urls: &[String],
        snapshot: &ProgressSnapshot,
    ) -> serde_json::Result<Vec<StoreEntry>> {
        let full = serde_json::to_string(snapshot)?;
        let reduced = serde_json::to_string(&snapshot.reduced())?;
        let file = snapshot
            .file_name()
            .map(|name| (name, snapshot.downloaded_bytes.unwrap_or(0).to_string()));

        let mut entries = Vec::new();
        for (id_type, value) in Self::identifiers(invocation_id, urls, snapshot) {
            entries.push(StoreEntry::Set {
                key: self.keys.key(Entity::Info, id_type, value),
                value: full.clone(),
            });
            entries.push(StoreEntry::Set {
                key: self.keys.key(Entity::Progress, id_type, value),
                value: reduced.clone(),
            });
            if let Some((name, bytes)) = &file {
                entries.push(StoreEntry::HashSet {
                    key: self.keys.key(Entity::DownloadedBytes, id_type, value),
                    field: name.to_string(),
                    value: bytes.clone(),
                });
            }
        }

        Ok(entries)
    }

    /// Write one snapshot as a single batch.
    pub async fn track(
        &self,
        invocation_id: &InvocationId,
        urls: &[String],
        snapshot: &ProgressSnapshot,
    ) -> Result<(), String> {
        let entries = self
            .entries(invocation_id, urls, snapshot)
            .map_err(|e| e.to_string())?;
        self.sink
            .write_batch(entries)
            .await
            .map_err(|e| e.to_string())
    }

    /// Start the writer task for one invocation.
    pub fn start(&self, invocation_id: InvocationId, urls: Vec<String>) -> ProgressSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let activity = Arc::new(Notify::new());

        let writer = tokio::spawn(run_writer(self.clone(), invocation_id, urls, rx, close_rx));

        ProgressSession {
            sink: Arc::new(ChannelSink {
                tx,
                activity: Arc::clone(&activity),
            }),
            activity,
            close: close_tx,
            writer,
        }
    }
}

async fn run_writer(
    tracker: ProgressTracker,
    invocation_id: InvocationId,
    urls: Vec<String>,
    mut rx: mpsc::UnboundedReceiver<ProgressSnapshot>,
    mut close: oneshot::Receiver<()>,
) {
    let mut failures = FailureTracker::new(LOGGED_WRITE_FAILURES);
    let write = |snapshot: ProgressSnapshot| {
        let tracker = tracker.clone();
        let invocation_id = invocation_id.clone();
        let urls = urls.clone();
        async move { tracker.track(&invocation_id, &urls, &snapshot).await }
    };

    let mut written = 0usize;
    loop {
        let snapshot = tokio::select! {
            biased;
            Some(snapshot) = rx.recv() => snapshot,
            _ = &mut close => break,
        };
        record(write(snapshot).await, &mut failures, &invocation_id);
        written += 1;
    }

    // Drain whatever the engine queued before the session closed.
    while let Ok(snapshot) = rx.try_recv() {
        record(write(snapshot).await, &mut failures, &invocation_id);
        written += 1;
    }

    debug!(invocation_id = %invocation_id, snapshots = written, "Progress writer finished");
}

fn record(result: Result<(), String>, failures: &mut FailureTracker, invocation_id: &InvocationId) {
    match result {
        Ok(()) => {
            failures.record_success();
            metrics::record_progress_write();
        }
        Err(e) => {
            metrics::record_progress_write_failure();
            if failures.record_failure() {
                warn!(invocation_id = %invocation_id, "Failed to write progress: {}", e);
            }
        }
    }
}

/// The engine-facing side of a progress session.
struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressSnapshot>,
    activity: Arc<Notify>,
}

impl ProgressSink for ChannelSink {
    fn on_snapshot(&self, snapshot: ProgressSnapshot) {
        self.activity.notify_one();
        // The writer outlives every sender unless it was aborted; then the
        // snapshot is simply dropped.
        let _ = self.tx.send(snapshot);
    }
}

/// Progress plumbing for one running invocation.
pub struct ProgressSession {
    sink: Arc<ChannelSink>,
    activity: Arc<Notify>,
    close: oneshot::Sender<()>,
    writer: JoinHandle<()>,
}

impl ProgressSession {
    /// Sink to hand to the engine.
    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        self.sink.clone()
    }

    /// Notified on every snapshot; used for inactivity detection.
    pub fn activity(&self) -> Arc<Notify> {
        Arc::clone(&self.activity)
    }

    /// Stop accepting snapshots and wait up to `timeout` for queued writes.
    pub async fn finish(self, timeout: Duration) {
        let ProgressSession {
            sink, close, mut writer, ..
        } = self;
        drop(sink);
        let _ = close.send(());

        if tokio::time::timeout(timeout, &mut writer).await.is_err() {
            warn!("Progress writer did not finish within {:?}, abandoning", timeout);
            writer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySink;
    use serde_json::json;
    use tubeflow_models::ProgressStatus;

    fn downloading(bytes: u64) -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot::new(ProgressStatus::Downloading);
        snapshot.downloaded_bytes = Some(bytes);
        snapshot
    }

    fn tracker(sink: &Arc<MemorySink>) -> ProgressTracker {
        ProgressTracker::new(sink.clone(), ProgressKeys::default())
    }

    #[tokio::test]
    async fn test_fans_out_by_invocation_and_url() {
        let sink = Arc::new(MemorySink::default());
        let tracker = tracker(&sink);
        let id = InvocationId::from("inv1");
        let urls = vec!["https://x/y".to_string()];

        tracker.track(&id, &urls, &downloading(1024)).await.unwrap();

        let full = sink
            .get("tubeflow:download:info:by-invocation-id:inv1")
            .unwrap();
        let full: serde_json::Value = serde_json::from_str(&full).unwrap();
        assert_eq!(full["status"], "downloading");
        assert_eq!(full["downloaded_bytes"], 1024);

        assert!(sink.get("tubeflow:download:progress:by-invocation-id:inv1").is_some());
        assert!(sink.get("tubeflow:download:info:by-url:https://x/y").is_some());
        assert!(sink.get("tubeflow:download:progress:by-url:https://x/y").is_some());
        assert!(!sink.keys().iter().any(|key| key.contains(":by-id:")));
        assert_eq!(sink.batches(), 1);
    }

    #[tokio::test]
    async fn test_content_id_once_known() {
        let sink = Arc::new(MemorySink::default());
        let tracker = tracker(&sink);
        let id = InvocationId::from("inv1");
        let urls = vec!["https://x/y".to_string()];

        tracker.track(&id, &urls, &downloading(10)).await.unwrap();
        assert!(sink.get("tubeflow:download:progress:by-id:abc123").is_none());

        let mut later = downloading(2048);
        later.info_dict = Some(json!({"id": "abc123", "title": "Clip"}));
        tracker.track(&id, &urls, &later).await.unwrap();

        let reduced = sink.get("tubeflow:download:progress:by-id:abc123").unwrap();
        let reduced: serde_json::Value = serde_json::from_str(&reduced).unwrap();
        assert_eq!(reduced["downloaded_bytes"], 2048);
        assert!(reduced.get("info_dict").is_none());
        assert!(sink.get("tubeflow:download:info:by-id:abc123").unwrap().contains("Clip"));
    }

    #[test]
    fn test_source_url_narrows_url_fanout() {
        let id = InvocationId::from("inv1");
        let urls = vec!["https://a".to_string(), "https://b".to_string()];

        let early = downloading(1);
        let all = ProgressTracker::identifiers(&id, &urls, &early);
        assert_eq!(all.iter().filter(|(t, _)| *t == IdentifierType::Url).count(), 2);

        let mut known = downloading(1);
        known.info_dict = Some(json!({"id": "v1", "original_url": "https://b"}));
        let narrowed = ProgressTracker::identifiers(&id, &urls, &known);
        assert_eq!(
            narrowed,
            vec![
                (IdentifierType::InvocationId, "inv1"),
                (IdentifierType::Url, "https://b"),
                (IdentifierType::ContentId, "v1"),
            ]
        );
    }

    #[test]
    fn test_downloaded_bytes_hash_per_file() {
        let tracker = ProgressTracker::new(Arc::new(MemorySink::default()), ProgressKeys::default());
        let mut snapshot = downloading(500);
        snapshot.filename = Some("/scratch/abc/video.f137.mp4".to_string());

        let entries = tracker
            .entries(&InvocationId::from("inv1"), &["https://x".to_string()], &snapshot)
            .unwrap();

        assert!(entries.contains(&StoreEntry::HashSet {
            key: "tubeflow:download:downloaded-bytes:by-invocation-id:inv1".to_string(),
            field: "video.f137.mp4".to_string(),
            value: "500".to_string(),
        }));
        assert_eq!(entries.len(), 6);
    }

    #[tokio::test]
    async fn test_session_writes_in_order_and_flushes() {
        let sink = Arc::new(MemorySink::default());
        let session = tracker(&sink).start(InvocationId::from("inv1"), vec!["https://x".to_string()]);

        let engine_sink = session.sink();
        for bytes in [1, 2, 3] {
            engine_sink.on_snapshot(downloading(bytes));
        }
        drop(engine_sink);
        session.finish(Duration::from_secs(5)).await;

        assert_eq!(sink.batches(), 3);
        let last = sink.get("tubeflow:download:progress:by-invocation-id:inv1").unwrap();
        assert!(last.contains(r#""downloaded_bytes":3"#));
    }

    #[tokio::test]
    async fn test_sink_failures_are_swallowed() {
        let sink = Arc::new(MemorySink::failing());
        let session = tracker(&sink).start(InvocationId::from("inv1"), vec!["https://x".to_string()]);

        session.sink().on_snapshot(downloading(1));
        session.finish(Duration::from_secs(5)).await;

        assert_eq!(sink.batches(), 0);
    }
}
