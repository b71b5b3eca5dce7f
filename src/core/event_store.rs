//! Append-only session event store with file-based persistence.
//!
//! Each capture session gets its own directory holding the raw blob and an
//! `events.jsonl` log. Events are newline-delimited JSON for simplicity and
//! easy inspection.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{CaptureSession, Event, PipelineStage};

/// File-based event store for one capture session
pub struct EventStore {
    /// Directory containing the session
    session_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Serializes appends from concurrently running stages
    write_lock: Mutex<()>,
}

impl EventStore {
    /// Create or open the event store for a session under `sessions_dir`
    pub async fn open(sessions_dir: &Path, session_id: Uuid) -> Result<Self> {
        let session_dir = sessions_dir.join(session_id.to_string());

        fs::create_dir_all(&session_dir)
            .await
            .with_context(|| format!("Failed to create session directory: {}", session_dir.display()))?;

        let events_path = session_dir.join("events.jsonl");

        Ok(Self {
            session_dir,
            events_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the session directory
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Store the raw capture blob next to the log
    pub async fn store_blob(&self, blob: &[u8]) -> Result<PathBuf> {
        let blob_path = self.session_dir.join("capture.bin");

        fs::write(&blob_path, blob)
            .await
            .with_context(|| format!("Failed to write capture blob: {}", blob_path.display()))?;

        Ok(blob_path)
    }

    /// Load the raw capture blob
    pub async fn load_blob(&self, blob_path: &Path) -> Result<Vec<u8>> {
        fs::read(blob_path)
            .await
            .with_context(|| format!("Failed to read capture blob: {}", blob_path.display()))
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        let path = self.events_path.clone();

        let _guard = self.write_lock.lock().await;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open events file: {}", path.display()))?;

            file.lock_exclusive()
                .context("Failed to acquire file lock on events.jsonl")?;
            let written = writeln!(file, "{}", json)
                .and_then(|_| file.flush())
                .context("Failed to write event");
            file.unlock().context("Failed to release events.jsonl lock")?;
            written
        })
        .await
        .context("Event append task panicked")?
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild the session record from the log
    pub async fn load_session(&self) -> Result<Option<CaptureSession>> {
        let events = self.replay().await?;
        Ok(CaptureSession::from_events(&events))
    }

    /// List all session IDs under `sessions_dir`
    pub async fn list_sessions(sessions_dir: &Path) -> Result<Vec<Uuid>> {
        if !sessions_dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(sessions_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        sessions.push(uuid);
                    }
                }
            }
        }

        Ok(sessions)
    }
}

/// Generate an idempotency key for a stage
pub fn generate_idempotency_key(session_id: Uuid, stage: PipelineStage, input: &[u8]) -> String {
    format!("{}:{}:{}", session_id, stage, hash_input(input))
}

/// Hash input content (first 16 hex chars of SHA256)
pub fn hash_input(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, StepStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_store() -> (EventStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = EventStore::open(temp_dir.path(), Uuid::new_v4()).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_event_replay_order() {
        let (store, _temp) = create_test_store().await;
        let session_id = Uuid::new_v4();

        for i in 0..5 {
            let event = Event::new(
                session_id,
                Some(PipelineStage::Transcribing),
                EventType::StageStarted,
                format!("{}:transcribing:{}", session_id, i),
                format!("Attempt {} started", i),
                StepStatus::Running,
            )
            .with_attempt(i);
            store.append(&event).await.unwrap();
        }

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 5);

        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.attempt, Some(i as u32));
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_lines_whole() {
        let (store, _temp) = create_test_store().await;
        let store = Arc::new(store);
        let session_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for stage in PipelineStage::BEST_EFFORT {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let event = Event::new(
                        session_id,
                        Some(stage),
                        EventType::StageStarted,
                        format!("{}:{}", session_id, stage),
                        "x".repeat(512),
                        StepStatus::Running,
                    );
                    store.append(&event).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.replay().await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_blob_roundtrip_and_listing() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = EventStore::open(temp.path(), id).await.unwrap();

        let path = store.store_blob(b"raw capture").await.unwrap();
        assert_eq!(store.load_blob(&path).await.unwrap(), b"raw capture");

        let listed = EventStore::list_sessions(temp.path()).await.unwrap();
        assert_eq!(listed, vec![id]);
    }

    #[test]
    fn test_idempotency_key_format() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = generate_idempotency_key(id, PipelineStage::Normalizing, b"blob");

        assert!(key.starts_with("550e8400-e29b-41d4-a716-446655440000:normalizing:"));
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 16);
    }
}
