//! Core orchestration logic.
//!
//! This module contains:
//! - Error: The pipeline error taxonomy
//! - Retry: Retry policies with exponential backoff
//! - EventStore: Append-only session event logging
//! - Orchestrator: Runs capture sessions through the pipeline

pub mod error;
pub mod event_store;
pub mod orchestrator;
pub mod retry;

// Re-export commonly used types
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use event_store::{generate_idempotency_key, hash_input, EventStore};
pub use orchestrator::{Orchestrator, PipelineSettings, ProviderSet, SessionReport};
pub use retry::{with_timeout, RetryPolicy};
