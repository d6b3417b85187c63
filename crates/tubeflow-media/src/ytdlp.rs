//! `DownloadEngine` backed by the yt-dlp command-line tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, trace};
use tubeflow_models::ProgressSnapshot;

use crate::engine::{deliver, DownloadEngine, ProgressSink};
use crate::error::{EngineFailure, EngineResult, ExtractionKind};
use crate::params::EngineParams;
use crate::stderr::failure_from_stderr;

/// Marker at the start of machine-readable progress lines.
pub const PROGRESS_MARKER: &str = "tubeflow-progress";

/// One line per progress update: marker, resolved metadata, progress dict.
const PROGRESS_TEMPLATE: &str = "download:tubeflow-progress\t%(info.{id,title,original_url,webpage_url,extractor,ext,duration})j\t%(progress)j";

/// Only the tail of stderr is kept for failure parsing.
const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// Runs yt-dlp as a child process.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary: PathBuf,
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Resolve `binary` on `PATH`.
    pub fn locate(binary: impl AsRef<Path>) -> EngineResult<Self> {
        let binary = binary.as_ref();
        let resolved = which::which(binary).map_err(|e| {
            EngineFailure::other(
                "EngineNotFound",
                format!("{} not found: {e}", binary.display()),
            )
        })?;
        Ok(Self::new(resolved))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--ignore-config", "--no-colors"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn spawn_failure(binary: &Path, e: std::io::Error) -> EngineFailure {
    match e.raw_os_error() {
        Some(errno) if e.kind() != std::io::ErrorKind::NotFound => {
            EngineFailure::os(errno, format!("failed to start {}: {e}", binary.display()))
        }
        _ => EngineFailure::other(
            "EngineNotFound",
            format!("failed to start {}: {e}", binary.display()),
        ),
    }
}

/// Parse one stdout line produced by the progress template.
pub fn parse_progress_line(line: &str) -> Option<ProgressSnapshot> {
    let rest = line.strip_prefix(PROGRESS_MARKER)?.strip_prefix('\t')?;
    let (info, progress) = rest.split_once('\t')?;

    let mut snapshot: ProgressSnapshot = serde_json::from_str(progress.trim()).ok()?;
    if let Ok(info @ Value::Object(_)) = serde_json::from_str::<Value>(info) {
        snapshot.info_dict = Some(info);
    }
    Some(snapshot)
}

async fn read_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut reader = reader;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > STDERR_TAIL_BYTES {
                    let excess = buf.len() - STDERR_TAIL_BYTES;
                    buf.drain(..excess);
                }
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait]
impl DownloadEngine for YtDlpEngine {
    async fn download(
        &self,
        params: &EngineParams,
        urls: &[String],
        output_root: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> EngineResult<()> {
        let mut cmd = self.command();
        cmd.args(params.to_args())
            // After the params so the scratch root cannot be overridden.
            .arg("--paths")
            .arg(format!("home:{}", output_root.display()))
            .args(["--newline", "--progress", "--progress-template", PROGRESS_TEMPLATE])
            .arg("--")
            .args(urls);

        debug!(binary = %self.binary.display(), urls = ?urls, "Starting yt-dlp download");

        let mut child = cmd.spawn().map_err(|e| spawn_failure(&self.binary, e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineFailure::other("EngineIo", "stderr not captured"))?;
        let stderr_task = tokio::spawn(read_tail(stderr));

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress_line(&line) {
                    Some(snapshot) => deliver(progress.as_ref(), snapshot),
                    None => trace!(line = %line, "yt-dlp output"),
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EngineFailure::other("EngineIo", format!("failed to wait for yt-dlp: {e}")))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            info!(urls = urls.len(), "yt-dlp download finished");
            Ok(())
        } else {
            debug!(stderr = %stderr, "yt-dlp download failed");
            Err(failure_from_stderr(&stderr, status))
        }
    }

    async fn extract_info(&self, params: &EngineParams, url: &str) -> EngineResult<Value> {
        let mut cmd = self.command();
        cmd.args(params.to_args())
            .args(["--dump-single-json", "--no-progress"])
            .arg("--")
            .arg(url);

        debug!(binary = %self.binary.display(), url = %url, "Starting yt-dlp extraction");

        let output = cmd
            .output()
            .await
            .map_err(|e| spawn_failure(&self.binary, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(stderr = %stderr, "yt-dlp extraction failed");
            return Err(failure_from_stderr(&stderr, output.status));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            EngineFailure::extraction(
                ExtractionKind::Parse,
                format!("engine returned invalid metadata JSON: {e}"),
            )
        })
    }
}
