//! Capture session state and reconstruction from events.
//!
//! A CaptureSession is one submitted recording or photo and its processing
//! record. It is never written directly: the orchestrator appends events and
//! readers fold them with [`CaptureSession::from_events`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ErrorKind;

use super::events::{Event, EventType, StepStatus};

/// Reason recorded when a session is cancelled mid-flight
pub const CANCELLED_REASON: &str = "cancelled";

/// Stages of the capture pipeline, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Normalizing,
    Transcribing,
    ExtractingTodos,
    Indexing,
    UpdatingGraph,
    Finished,
}

impl PipelineStage {
    /// Enrichment stages that run once a transcript exists
    pub const BEST_EFFORT: [PipelineStage; 3] = [
        PipelineStage::ExtractingTodos,
        PipelineStage::Indexing,
        PipelineStage::UpdatingGraph,
    ];

    /// Whether a failure in this stage fails the whole session
    pub fn is_required(self) -> bool {
        matches!(self, Self::Normalizing | Self::Transcribing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Normalizing => "normalizing",
            Self::Transcribing => "transcribing",
            Self::ExtractingTodos => "extracting_todos",
            Self::Indexing => "indexing",
            Self::UpdatingGraph => "updating_graph",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal (or not yet terminal) status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Still being processed
    Pending,

    /// Transcript produced, at least one enrichment stage failed
    Partial,

    /// Every stage succeeded
    Complete,

    /// A required stage failed or the session was cancelled
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened to one stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub status: StepStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: Option<u64>,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Data attached to the `session_submitted` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionData {
    pub owner_id: String,
    pub blob_path: PathBuf,
    pub declared_media_type: Option<String>,
    pub blob_bytes: u64,
}

/// One capture and its processing record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSession {
    /// Unique identifier for this session
    pub id: Uuid,

    /// User the capture belongs to
    pub owner_id: String,

    /// Where the raw blob is stored
    pub blob_path: PathBuf,

    /// Media type the client declared (untrusted)
    pub declared_media_type: Option<String>,

    /// When the capture was submitted
    pub created_at: DateTime<Utc>,

    /// Most recently entered stage
    pub stage: PipelineStage,

    /// Session status
    pub status: SessionStatus,

    /// Why the session failed (only for `failed`)
    pub failure_reason: Option<String>,

    /// Per-stage outcomes
    pub stages: BTreeMap<PipelineStage, StageOutcome>,

    /// When processing finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,
}

impl CaptureSession {
    /// Create a freshly received session
    pub fn new(
        id: Uuid,
        owner_id: String,
        blob_path: PathBuf,
        declared_media_type: Option<String>,
    ) -> Self {
        Self {
            id,
            owner_id,
            blob_path,
            declared_media_type,
            created_at: Utc::now(),
            stage: PipelineStage::Received,
            status: SessionStatus::Pending,
            failure_reason: None,
            stages: BTreeMap::new(),
            completed_at: None,
        }
    }

    /// Reconstruct session state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;
        if first.event_type != EventType::SessionSubmitted {
            return None;
        }

        let submission: SubmissionData =
            serde_json::from_value(first.data.clone()?).ok()?;

        let mut session = Self::new(
            first.session_id,
            submission.owner_id,
            submission.blob_path,
            submission.declared_media_type,
        );
        session.created_at = first.timestamp;

        for event in &events[1..] {
            session.apply_event(event);
        }

        Some(session)
    }

    /// Apply a single event to update session state. The first terminal
    /// event wins; anything logged after it is ignored.
    pub fn apply_event(&mut self, event: &Event) {
        if self.status.is_terminal() {
            return;
        }
        match event.event_type {
            EventType::SessionSubmitted => {}
            EventType::StageStarted => {
                if let Some(stage) = event.stage {
                    self.stage = stage;
                    let outcome = self.stages.entry(stage).or_default();
                    outcome.status = StepStatus::Running;
                    outcome.attempts = event.attempt.unwrap_or(outcome.attempts + 1);
                }
            }
            EventType::StageRetrying => {
                if let Some(stage) = event.stage {
                    let outcome = self.stages.entry(stage).or_default();
                    outcome.status = StepStatus::Running;
                    outcome.error = event.error.clone();
                    outcome.error_kind = event.error_kind;
                }
            }
            EventType::StageCompleted => {
                if let Some(stage) = event.stage {
                    let outcome = self.stages.entry(stage).or_default();
                    outcome.status = StepStatus::Completed;
                    outcome.error = None;
                    outcome.error_kind = None;
                    outcome.duration_ms = event.duration_ms;
                }
            }
            EventType::StageFailed => {
                if let Some(stage) = event.stage {
                    let outcome = self.stages.entry(stage).or_default();
                    outcome.status = StepStatus::Failed;
                    outcome.error = event.error.clone();
                    outcome.error_kind = event.error_kind;
                    outcome.duration_ms = event.duration_ms;
                }
            }
            EventType::SessionCompleted => {
                self.finish(SessionStatus::Complete, event.timestamp);
            }
            EventType::SessionPartial => {
                self.finish(SessionStatus::Partial, event.timestamp);
            }
            EventType::SessionFailed => {
                self.failure_reason = event.error.clone();
                self.finish(SessionStatus::Failed, event.timestamp);
            }
            EventType::SessionCancelled => {
                self.failure_reason = Some(CANCELLED_REASON.to_string());
                self.finish(SessionStatus::Failed, event.timestamp);
            }
        }
    }

    fn finish(&mut self, status: SessionStatus, at: DateTime<Utc>) {
        self.status = status;
        self.stage = PipelineStage::Finished;
        self.completed_at = Some(at);
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stage_succeeded(&self, stage: PipelineStage) -> bool {
        self.stages
            .get(&stage)
            .map(StageOutcome::succeeded)
            .unwrap_or(false)
    }
}
