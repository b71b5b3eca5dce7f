//! Capture inbox watcher.
//!
//! Watches a directory for new audio and image files and submits each one
//! as a capture session once it is stable (no longer being written).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::inbox::{compute_file_hash, InboxError, InboxLedger};
use crate::core::PipelineResult;
use crate::domain::Encoding;

/// Where inbox files are sent
#[async_trait]
pub trait CaptureSink: Send + Sync {
    /// Start a capture session for the blob and return its id
    async fn submit(
        &self,
        owner_id: &str,
        blob: Vec<u8>,
        declared_media_type: Option<String>,
    ) -> PipelineResult<Uuid>;
}

/// Configuration for the inbox watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Directory to watch
    pub watch_path: PathBuf,

    /// Owner the captures are filed under
    pub owner_id: String,

    /// How long a file must be stable before processing (seconds)
    pub stability_delay_secs: u64,

    /// File extensions to pick up
    pub extensions: Vec<String>,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            watch_path: Self::default_inbox_path(),
            owner_id: "local".to_string(),
            stability_delay_secs: 3,
            extensions: [
                "m4a", "mp3", "mp4", "wav", "ogg", "oga", "webm", "flac", "aac", "amr", "3gp",
                "aiff", "png", "jpg", "jpeg", "gif", "webp", "heic", "tiff", "bmp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl InboxConfig {
    /// `~/.neuromap/inbox`
    pub fn default_inbox_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("~"))
            .join(".neuromap")
            .join("inbox")
    }

    /// Check if the watch path exists
    pub fn validate(&self) -> Result<(), InboxError> {
        if !self.watch_path.is_dir() {
            return Err(InboxError::DirectoryNotFound(self.watch_path.clone()));
        }
        Ok(())
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// A file that became a capture session
#[derive(Debug, Clone)]
pub struct SubmittedCapture {
    pub path: PathBuf,
    pub hash: String,
    pub session_id: Uuid,
}

/// What happened to one inbox file
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Submitted(SubmittedCapture),
    AlreadySubmitted(String),
}

/// Result of a directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub submitted: Vec<SubmittedCapture>,
    pub already_submitted: usize,
    pub errors: usize,
}

/// Inbox watcher with stability checking
pub struct InboxWatcher {
    config: InboxConfig,
    ledger: Arc<InboxLedger>,
    sink: Arc<dyn CaptureSink>,
}

impl InboxWatcher {
    pub fn new(config: InboxConfig, ledger: Arc<InboxLedger>, sink: Arc<dyn CaptureSink>) -> Self {
        Self { config, ledger, sink }
    }

    pub fn config(&self) -> &InboxConfig {
        &self.config
    }

    /// Submit every eligible file currently in the inbox
    pub async fn scan_once(&self) -> Result<ScanResult, InboxError> {
        self.config.validate()?;

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.watch_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.config.accepts(&path) && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        // Submission order should not depend on directory order
        paths.sort();

        let mut result = ScanResult::default();
        for path in paths {
            match submit_file(&self.config, &self.ledger, self.sink.as_ref(), &path).await {
                Ok(FileOutcome::Submitted(capture)) => result.submitted.push(capture),
                Ok(FileOutcome::AlreadySubmitted(_)) => result.already_submitted += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to submit inbox file");
                    result.errors += 1;
                }
            }
        }
        Ok(result)
    }

    /// Watch the inbox until stopped, emitting each submitted capture
    pub fn watch(&self) -> Result<(mpsc::Receiver<SubmittedCapture>, WatchHandle), InboxError> {
        self.config.validate()?;

        let (event_tx, event_rx) = mpsc::channel::<SubmittedCapture>(100);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let config = self.config.clone();
        let ledger = self.ledger.clone();
        let sink = self.sink.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_watcher(config, ledger, sink, event_tx, &mut stop_rx).await {
                tracing::error!(error = %e, "Inbox watcher stopped");
            }
        });

        Ok((
            event_rx,
            WatchHandle {
                stop_tx,
                task: handle,
            },
        ))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

async fn submit_file(
    config: &InboxConfig,
    ledger: &InboxLedger,
    sink: &dyn CaptureSink,
    path: &Path,
) -> Result<FileOutcome, InboxError> {
    let hash = compute_file_hash(path).await?;
    if ledger.is_submitted(&hash).await? {
        tracing::debug!(path = %path.display(), hash = %hash, "Inbox file already submitted");
        return Ok(FileOutcome::AlreadySubmitted(hash));
    }

    let blob = tokio::fs::read(path).await?;
    let declared = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(Encoding::from_extension)
        .map(|e| e.mime_type().to_string());

    match sink.submit(&config.owner_id, blob, declared).await {
        Ok(session_id) => {
            ledger.record_submitted(&hash, path, session_id).await?;
            tracing::info!(path = %path.display(), session_id = %session_id, "Inbox file submitted");
            Ok(FileOutcome::Submitted(SubmittedCapture {
                path: path.to_path_buf(),
                hash,
                session_id,
            }))
        }
        Err(e) => {
            ledger.record_failed(&hash, path, &e.to_string()).await?;
            Err(InboxError::Submit(e.to_string()))
        }
    }
}

async fn run_watcher(
    config: InboxConfig,
    ledger: Arc<InboxLedger>,
    sink: Arc<dyn CaptureSink>,
    event_tx: mpsc::Sender<SubmittedCapture>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<(), InboxError> {
    // path -> (size, last_seen)
    let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

    // the debouncer thread forwards into the runtime; nothing here blocks a worker
    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(Duration::from_secs(1), move |result: DebounceEventResult| {
        let _ = tx.send(result);
    })?;
    debouncer
        .watcher()
        .watch(&config.watch_path, RecursiveMode::NonRecursive)?;

    let stability_delay = Duration::from_secs(config.stability_delay_secs);
    let mut tick = tokio::time::interval(Duration::from_millis(500));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(path = %config.watch_path.display(), "Watching inbox");

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::info!("Inbox watcher stopping");
                break;
            }
            received = rx.recv() => match received {
                Some(Ok(events)) => {
                    for event in events {
                        let path = event.path;
                        if !config.accepts(&path) {
                            continue;
                        }
                        if let Ok(metadata) = tokio::fs::metadata(&path).await {
                            if metadata.is_file() {
                                pending.insert(path, (metadata.len(), Instant::now()));
                            }
                        }
                    }
                }
                Some(Err(e)) => tracing::warn!(error = ?e, "Inbox watch error"),
                None => {
                    tracing::error!("Inbox watch channel disconnected");
                    break;
                }
            },
            _ = tick.tick() => {}
        }

        let now = Instant::now();
        let mut stable = Vec::new();
        for (path, (last_size, last_seen)) in pending.iter_mut() {
            if now.duration_since(*last_seen) < stability_delay {
                continue;
            }
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.len() == *last_size && *last_size > 0 => {
                    stable.push(path.clone());
                }
                Ok(metadata) => {
                    // still growing: restart the clock
                    *last_size = metadata.len();
                    *last_seen = now;
                }
                Err(_) => stable.push(path.clone()),
            }
        }

        for path in stable {
            pending.remove(&path);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            match submit_file(&config, &ledger, sink.as_ref(), &path).await {
                Ok(FileOutcome::Submitted(capture)) => {
                    let _ = event_tx.send(capture).await;
                }
                Ok(FileOutcome::AlreadySubmitted(_)) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to submit inbox file");
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineError;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        submitted: Mutex<Vec<(String, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl CaptureSink for RecordingSink {
        async fn submit(
            &self,
            owner_id: &str,
            _blob: Vec<u8>,
            declared_media_type: Option<String>,
        ) -> PipelineResult<Uuid> {
            if self.fail {
                return Err(PipelineError::Storage("disk full".to_string()));
            }
            self.submitted
                .lock()
                .unwrap()
                .push((owner_id.to_string(), declared_media_type));
            Ok(Uuid::new_v4())
        }
    }

    fn config(dir: &Path) -> InboxConfig {
        InboxConfig {
            watch_path: dir.to_path_buf(),
            owner_id: "u1".to_string(),
            stability_delay_secs: 1,
            ..InboxConfig::default()
        }
    }

    #[tokio::test]
    async fn test_scan_once_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path().join("inbox");
        tokio::fs::create_dir_all(&inbox).await.unwrap();
        tokio::fs::write(inbox.join("a.m4a"), b"audio a").await.unwrap();
        tokio::fs::write(inbox.join("b.png"), b"image b").await.unwrap();
        tokio::fs::write(inbox.join("notes.txt"), b"ignored").await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let ledger = Arc::new(InboxLedger::new(temp.path().join("inbox.jsonl")));
        let watcher = InboxWatcher::new(config(&inbox), ledger, sink.clone());

        let first = watcher.scan_once().await.unwrap();
        assert_eq!(first.submitted.len(), 2);

        let second = watcher.scan_once().await.unwrap();
        assert!(second.submitted.is_empty());
        assert_eq!(second.already_submitted, 2);

        let submitted = sink.submitted.lock().unwrap();
        assert_eq!(submitted[0], ("u1".to_string(), Some("audio/mp4".to_string())));
        assert_eq!(submitted[1].1.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_failed_submission_is_retried_next_scan() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("a.wav"), b"audio").await.unwrap();
        let ledger = Arc::new(InboxLedger::new(temp.path().join("ledger").join("inbox.jsonl")));

        let failing = InboxWatcher::new(
            config(temp.path()),
            ledger.clone(),
            Arc::new(RecordingSink {
                fail: true,
                ..Default::default()
            }),
        );
        assert_eq!(failing.scan_once().await.unwrap().errors, 1);

        let working = InboxWatcher::new(config(temp.path()), ledger, Arc::new(RecordingSink::default()));
        assert_eq!(working.scan_once().await.unwrap().submitted.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_submits_new_file_without_stalling_runtime() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path().join("inbox");
        tokio::fs::create_dir_all(&inbox).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let ledger = Arc::new(InboxLedger::new(temp.path().join("inbox.jsonl")));
        let watcher = InboxWatcher::new(config(&inbox), ledger, sink.clone());
        let (mut events, handle) = watcher.watch().unwrap();

        // shares the single test thread with the watcher loop
        let ticks = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            })
        };

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::fs::write(inbox.join("note.m4a"), b"audio bytes").await.unwrap();

        let capture = tokio::time::timeout(Duration::from_secs(15), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(capture.path.file_name().unwrap(), "note.m4a");
        assert_eq!(sink.submitted.lock().unwrap().len(), 1);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let ticks = ticks.load(std::sync::atomic::Ordering::SeqCst);
        assert!(ticks * 20 * 3 >= elapsed_ms, "{ticks} ticks in {elapsed_ms}ms");

        ticker.abort();
        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let watcher = InboxWatcher::new(
            config(Path::new("/nonexistent/neuromap/inbox")),
            Arc::new(InboxLedger::new(PathBuf::from("/tmp/unused.jsonl"))),
            Arc::new(RecordingSink::default()),
        );
        assert!(matches!(
            watcher.scan_once().await,
            Err(InboxError::DirectoryNotFound(_))
        ));
    }
}
