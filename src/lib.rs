//! neuromap - capture-to-knowledge pipeline
//!
//! Turns voice notes and photos into a transcript, a prioritised task
//! forest, a semantic index entry and updates to a per-owner concept graph.
//!
//! # Architecture
//!
//! Every capture becomes a session with its own append-only event log:
//! - All state changes are recorded as immutable events
//! - Current session state is derived by replaying events
//! - Normalizing and transcribing must succeed; the enrichment stages are
//!   best-effort and only decide between `complete` and `partial`
//!
//! # Modules
//!
//! - `adapters`: External providers (OpenAI-compatible API, whisper, ffmpeg)
//! - `core`: Orchestration logic (EventStore, RetryPolicy, Orchestrator)
//! - `domain`: Data structures (Event, CaptureSession, tasks, concepts)
//! - `ingest`: Format normalization and the inbox watcher
//! - `extract`: Todo and topic extraction from transcripts
//! - `index`: Semantic index and context retrieval
//! - `chat`: Questions answered from captured notes
//! - `graph`: Concept graph sync and layered layout
//! - `store`: SQLite persistence
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process a voice note
//! neuromap submit note.m4a
//!
//! # Show the task forest
//! neuromap tasks list
//!
//! # Lay out the concept graph left to right
//! neuromap graph --direction LR
//!
//! # Ask about earlier notes
//! neuromap ask "when is the bank call?"
//! ```

pub mod adapters;
pub mod chat;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod extract;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, PipelineError, ProviderSet, SessionReport};
pub use domain::{CaptureSession, ConceptGraph, Event, EventType, SessionStatus, TaskTree};
pub use graph::{layout, layout_graph, Direction, LayoutConfig, PositionedNode};
pub use store::Database;
