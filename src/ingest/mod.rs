//! Capture ingestion.
//!
//! - **Normalizer**: identifies a capture and converts it into an encoding
//!   the transcription providers accept
//! - **Inbox**: JSONL ledger of files already handed to the pipeline
//! - **Watcher**: picks up new files dropped into the inbox directory
//!
//! ```text
//! inbox dir → Watcher → Ledger → Orchestrator::submit_capture
//!                                     ↓
//!                                 Normalizer → Transcriber → ...
//! ```

pub mod inbox;
pub mod normalizer;
pub mod watcher;

pub use inbox::{compute_file_hash, InboxError, InboxLedger, LedgerEntry, LedgerEventType};
pub use normalizer::{FormatNormalizer, DEFAULT_MAX_CAPTURE_BYTES};
pub use watcher::{CaptureSink, InboxConfig, InboxWatcher, ScanResult, SubmittedCapture, WatchHandle};
