//! Event types for capture sessions.
//!
//! Every state change of a session is recorded as an immutable event in an
//! append-only log. The session record is derived by replaying them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ErrorKind;

use super::session::PipelineStage;

/// A single event in a session's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,

    /// `None` for session-level events
    pub stage: Option<PipelineStage>,

    pub event_type: EventType,

    /// Idempotency key format: "{session_id}:{stage}:{input_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (no transcript text, no secrets)
    pub payload_summary: String,

    /// Status of the stage/session after this event
    pub status: StepStatus,

    /// Attempt number for stage events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Time taken in milliseconds (for finished stages)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Error classification if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Structured data (depends on event type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// New event stamped with the current time
    pub fn new(
        session_id: Uuid,
        stage: Option<PipelineStage>,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id,
            stage,
            event_type,
            idempotency_key,
            payload_summary,
            status,
            attempt: None,
            duration_ms: None,
            error: None,
            error_kind: None,
            data: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String, kind: Option<ErrorKind>) -> Self {
        self.error = Some(error);
        self.error_kind = kind;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Types of events that can occur while processing a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A capture was accepted and stored
    SessionSubmitted,

    /// A stage attempt has started
    StageStarted,

    /// A stage completed successfully
    StageCompleted,

    /// A stage failed for good
    StageFailed,

    /// A stage attempt failed and will be retried
    StageRetrying,

    /// Every stage succeeded
    SessionCompleted,

    /// Transcript exists but at least one enrichment stage failed
    SessionPartial,

    /// A required stage failed
    SessionFailed,

    /// Processing was cancelled by the caller
    SessionCancelled,
}

/// Status recorded on each event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}
