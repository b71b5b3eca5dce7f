//! Domain types for the neuromap pipeline.
//!
//! This module contains the core data structures:
//! - Events: Immutable records of session state changes
//! - CaptureSession: Pipeline state for one capture
//! - Tasks: The task forest and its presentation overlay
//! - Concepts: The concept graph
//! - Capture: Encodings and normalized capture bytes
//! - Records: Transcripts and embedding records

pub mod capture;
pub mod concept;
pub mod events;
pub mod records;
pub mod session;
pub mod task;

// Re-export commonly used types
pub use capture::{Encoding, Medium, NormalizedCapture};
pub use concept::{ConceptEdge, ConceptGraph, ConceptKind, ConceptNode, Topic};
pub use events::{Event, EventType, StepStatus};
pub use records::{EmbeddingRecord, Transcript};
pub use session::{CaptureSession, PipelineStage, SessionStatus, StageOutcome, SubmissionData};
pub use task::{
    ExpansionState, ExtractedTask, TaskArena, TaskId, TaskNode, TaskRow, TaskTree, PRIORITY_MAX,
    PRIORITY_MIN,
};
