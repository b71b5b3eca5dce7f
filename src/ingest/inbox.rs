//! JSONL ledger of inbox files that were handed to the pipeline.
//!
//! Follows the EventStore pattern: append-only JSONL with state derived from
//! replay. Entries are keyed by a hash of the file's content, so a file that
//! is renamed or touched is still recognised as already submitted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::core::hash_input;

/// Errors that can occur with the inbox ledger
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("Inbox directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Submission failed: {0}")]
    Submit(String),
}

/// One line of the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub timestamp: DateTime<Utc>,

    /// Content hash of the file
    pub hash: String,

    pub event_type: LedgerEventType,

    pub file_path: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    /// File became a capture session
    Submitted,

    /// File could not be read or submitted
    Failed,
}

/// Current state of one hashed file (derived by replay)
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub hash: String,
    pub status: LedgerEventType,
    pub file_path: PathBuf,
    pub session_id: Option<Uuid>,
    pub error: Option<String>,
    pub failures: u32,
    pub updated_at: DateTime<Utc>,
}

/// Append-only inbox ledger
pub struct InboxLedger {
    path: PathBuf,
}

impl InboxLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Ledger in the default location (`$NEUROMAP_HOME/inbox.jsonl`)
    pub async fn open_default() -> anyhow::Result<Self> {
        let home = crate::config::neuromap_home()?;
        fs::create_dir_all(&home).await?;
        Ok(Self::new(home.join("inbox.jsonl")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &LedgerEvent) -> Result<(), InboxError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn record_submitted(
        &self,
        hash: &str,
        file_path: &Path,
        session_id: Uuid,
    ) -> Result<(), InboxError> {
        self.append(&LedgerEvent {
            timestamp: Utc::now(),
            hash: hash.to_string(),
            event_type: LedgerEventType::Submitted,
            file_path: file_path.to_path_buf(),
            session_id: Some(session_id),
            error: None,
        })
        .await
    }

    pub async fn record_failed(&self, hash: &str, file_path: &Path, error: &str) -> Result<(), InboxError> {
        self.append(&LedgerEvent {
            timestamp: Utc::now(),
            hash: hash.to_string(),
            event_type: LedgerEventType::Failed,
            file_path: file_path.to_path_buf(),
            session_id: None,
            error: Some(error.to_string()),
        })
        .await
    }

    /// Replay the ledger into per-hash state
    pub async fn replay(&self) -> Result<HashMap<String, LedgerEntry>, InboxError> {
        let mut entries: HashMap<String, LedgerEntry> = HashMap::new();
        if !self.path.exists() {
            return Ok(entries);
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: LedgerEvent = serde_json::from_str(&line)?;
            Self::apply_event(&mut entries, event);
        }
        Ok(entries)
    }

    fn apply_event(entries: &mut HashMap<String, LedgerEntry>, event: LedgerEvent) {
        let entry = entries.entry(event.hash.clone()).or_insert_with(|| LedgerEntry {
            hash: event.hash.clone(),
            status: event.event_type,
            file_path: event.file_path.clone(),
            session_id: None,
            error: None,
            failures: 0,
            updated_at: event.timestamp,
        });

        // A submitted file stays submitted
        if entry.status == LedgerEventType::Submitted && entry.session_id.is_some() {
            return;
        }

        entry.status = event.event_type;
        entry.file_path = event.file_path;
        entry.updated_at = event.timestamp;
        match event.event_type {
            LedgerEventType::Submitted => {
                entry.session_id = event.session_id;
                entry.error = None;
            }
            LedgerEventType::Failed => {
                entry.error = event.error;
                entry.failures += 1;
            }
        }
    }

    /// Whether content with this hash already became a session
    pub async fn is_submitted(&self, hash: &str) -> Result<bool, InboxError> {
        Ok(self
            .replay()
            .await?
            .get(hash)
            .map(|e| e.status == LedgerEventType::Submitted)
            .unwrap_or(false))
    }
}

/// Content hash used as the ledger key
pub async fn compute_file_hash(path: &Path) -> Result<String, InboxError> {
    let content = fs::read(path).await?;
    Ok(hash_input(&content))
}
