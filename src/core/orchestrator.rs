//! Main orchestrator for capture processing.
//!
//! Coordinates stage execution, event logging, retry handling and
//! cancellation. Each submitted capture runs in its own tokio task:
//!
//! ```text
//! Received → Normalizing → Transcribing ─┬─ ExtractingTodos ─┐
//!                                        ├─ Indexing ────────┼→ Complete | Partial
//!                                        └─ UpdatingGraph ───┘
//! ```
//!
//! Normalizing and Transcribing are required: once their retry budget is
//! spent the session fails. The three enrichment stages always all run and
//! only decide between `complete` and `partial`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Embedder, LanguageModel, Transcoder, Transcriber};
use crate::chat::{ChatTurn, NoteChat};
use crate::domain::records::{language_tag, DEFAULT_LANGUAGE};
use crate::domain::{
    CaptureSession, ConceptGraph, Event, EventType, PipelineStage, SessionStatus, StepStatus,
    SubmissionData, TaskTree, Transcript,
};
use crate::extract::{TodoExtractor, TodoProposal, TopicExtractor};
use crate::graph::GraphSynchronizer;
use crate::index::{SemanticIndexer, DEFAULT_CONTEXT_K};
use crate::ingest::normalizer::DEFAULT_MAX_CAPTURE_BYTES;
use crate::ingest::{CaptureSink, FormatNormalizer};
use crate::store::Database;

use super::error::{PipelineError, PipelineResult};
use super::event_store::{generate_idempotency_key, EventStore};
use super::retry::{with_timeout, RetryPolicy};

/// External providers the pipeline calls
#[derive(Clone)]
pub struct ProviderSet {
    pub transcriber: Arc<dyn Transcriber>,
    pub language_model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub transcoder: Arc<dyn Transcoder>,
}

/// Tunables for session processing
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Policy for normalizing and transcribing
    pub required_retry: RetryPolicy,
    /// Policy for the enrichment stages
    pub best_effort_retry: RetryPolicy,
    /// Limit on each stage attempt
    pub call_timeout: Duration,
    /// Records retrieved as context for topic extraction
    pub context_k: usize,
    pub max_capture_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            required_retry: RetryPolicy::required(),
            best_effort_retry: RetryPolicy::best_effort(),
            call_timeout: Duration::from_secs(60),
            context_k: DEFAULT_CONTEXT_K,
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

/// Everything known about one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: CaptureSession,
    pub transcript: Option<Transcript>,
    /// Task trees extracted from this capture
    pub todos: Vec<TaskTree>,
    pub indexed: bool,
    pub graph_updated: bool,
}

/// Bookkeeping for a session whose task is still running
struct InFlight {
    done: watch::Sender<bool>,
    abort: Option<AbortHandle>,
}

struct Inner {
    db: Database,
    sessions_dir: PathBuf,
    settings: PipelineSettings,
    normalizer: FormatNormalizer,
    transcriber: Arc<dyn Transcriber>,
    todos: TodoExtractor,
    topics: TopicExtractor,
    chat: NoteChat,
    indexer: SemanticIndexer,
    graph: GraphSynchronizer,
    in_flight: DashMap<Uuid, InFlight>,
}

/// Capture pipeline orchestrator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        sessions_dir: impl Into<PathBuf>,
        providers: ProviderSet,
        settings: PipelineSettings,
    ) -> Self {
        let normalizer = FormatNormalizer::new(providers.transcoder)
            .with_max_capture_bytes(settings.max_capture_bytes)
            .with_call_timeout(settings.call_timeout);

        Self {
            inner: Arc::new(Inner {
                sessions_dir: sessions_dir.into(),
                normalizer,
                transcriber: providers.transcriber,
                todos: TodoExtractor::new(providers.language_model.clone()),
                topics: TopicExtractor::new(providers.language_model.clone()),
                chat: NoteChat::new(providers.language_model),
                indexer: SemanticIndexer::new(providers.embedder, db.clone()),
                graph: GraphSynchronizer::new(db.clone()),
                db,
                settings,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.inner.sessions_dir
    }

    /// Store the capture, start processing it in the background and return
    /// the pending session
    #[instrument(skip(self, blob), fields(bytes = blob.len()))]
    pub async fn submit_capture(
        &self,
        owner_id: &str,
        blob: Vec<u8>,
        declared_media_type: Option<String>,
    ) -> PipelineResult<CaptureSession> {
        if owner_id.trim().is_empty() {
            return Err(PipelineError::ValidationFailure("owner id is empty".to_string()));
        }

        let session_id = Uuid::new_v4();
        let store = EventStore::open(&self.inner.sessions_dir, session_id)
            .await
            .map_err(storage_error)?;
        let blob_path = store.store_blob(&blob).await.map_err(storage_error)?;

        let submission = SubmissionData {
            owner_id: owner_id.to_string(),
            blob_path: blob_path.clone(),
            declared_media_type: declared_media_type.clone(),
            blob_bytes: blob.len() as u64,
        };
        let data = serde_json::to_value(&submission)
            .map_err(|e| PipelineError::Storage(format!("encode submission: {e}")))?;
        let event = Event::new(
            session_id,
            None,
            EventType::SessionSubmitted,
            generate_idempotency_key(session_id, PipelineStage::Received, &blob),
            format!("Capture of {} bytes submitted", blob.len()),
            StepStatus::Pending,
        )
        .with_data(data);
        record(&store, &event).await?;

        let mut session = CaptureSession::new(
            session_id,
            owner_id.to_string(),
            blob_path,
            declared_media_type.clone(),
        );
        session.created_at = event.timestamp;

        // registered before spawning so a fast task always finds its entry
        let (done, _) = watch::channel(false);
        self.inner
            .in_flight
            .insert(session_id, InFlight { done, abort: None });

        let this = self.clone();
        let owner = owner_id.to_string();
        let handle = tokio::spawn(async move {
            this.process(&store, session_id, &owner, blob, declared_media_type).await;
            if let Some((_, entry)) = this.inner.in_flight.remove(&session_id) {
                let _ = entry.done.send(true);
            }
        });
        if let Some(mut entry) = self.inner.in_flight.get_mut(&session_id) {
            entry.abort = Some(handle.abort_handle());
        }

        info!(%session_id, owner_id, "Capture submitted");
        Ok(session)
    }

    /// Wait until the session reaches a terminal status
    pub async fn wait_for(&self, session_id: Uuid) -> Result<CaptureSession> {
        let receiver = self
            .inner
            .in_flight
            .get(&session_id)
            .map(|entry| entry.done.subscribe());

        if let Some(mut rx) = receiver {
            // a dropped sender also means the session is over
            let _ = rx.wait_for(|done| *done).await;
        }

        self.load_session(session_id).await
    }

    /// Abort a running session. Returns false if it was not running.
    /// Side effects already committed (graph, embeddings) are kept.
    #[instrument(skip(self))]
    pub async fn cancel(&self, session_id: Uuid) -> Result<bool> {
        match self.inner.in_flight.get(&session_id) {
            Some(entry) => {
                if let Some(abort) = &entry.abort {
                    abort.abort();
                }
            }
            None => return Ok(false),
        }

        // the terminal event lands before waiters are released
        let store = EventStore::open(&self.inner.sessions_dir, session_id).await?;
        let event = Event::new(
            session_id,
            None,
            EventType::SessionCancelled,
            format!("{}:cancel", session_id),
            "Session cancelled".to_string(),
            StepStatus::Failed,
        );
        store.append(&event).await?;
        if let Some((_, entry)) = self.inner.in_flight.remove(&session_id) {
            let _ = entry.done.send(true);
        }

        warn!(%session_id, "Session cancelled");
        Ok(true)
    }

    /// Session state plus everything it produced
    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionReport> {
        let session = self.load_session(session_id).await?;

        let transcript = self.inner.db.transcript(session_id).await?;
        let todos = self
            .inner
            .db
            .session_tasks(&session.owner_id, session_id)
            .await?;

        Ok(SessionReport {
            indexed: session.stage_succeeded(PipelineStage::Indexing),
            graph_updated: session.stage_succeeded(PipelineStage::UpdatingGraph),
            session,
            transcript,
            todos,
        })
    }

    /// Most recent sessions first, optionally for one owner
    pub async fn list_sessions(&self, owner_id: Option<&str>, limit: usize) -> Result<Vec<CaptureSession>> {
        let ids = EventStore::list_sessions(&self.inner.sessions_dir).await?;
        let mut sessions = Vec::new();

        for id in ids {
            match self.load_session(id).await {
                Ok(session) => {
                    if owner_id.map_or(true, |o| o == session.owner_id) {
                        sessions.push(session);
                    }
                }
                Err(e) => warn!(session_id = %id, error = %e, "Skipping unreadable session"),
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    pub async fn get_graph(&self, owner_id: &str) -> Result<ConceptGraph> {
        Ok(self.inner.db.concept_graph(owner_id).await?)
    }

    /// Prior captured text related to `query`
    pub async fn retrieve_context(&self, owner_id: &str, query: &str, k: usize) -> Result<String> {
        Ok(self.inner.indexer.retrieve_context(owner_id, query, k).await?)
    }

    /// Answer `question` from the owner's captured notes. `history` holds
    /// the earlier turns of the conversation, oldest first.
    #[instrument(skip(self, question, history), fields(turns = history.len()))]
    pub async fn ask(&self, owner_id: &str, question: &str, history: &[ChatTurn]) -> Result<String> {
        let settings = &self.inner.settings;
        let context = with_timeout(
            settings.call_timeout,
            "context retrieval",
            self.inner.indexer.retrieve_context(owner_id, question, settings.context_k),
        )
        .await?;
        let answer = with_timeout(
            settings.call_timeout,
            "chat",
            self.inner.chat.answer(question, history, &context),
        )
        .await?;
        info!(owner_id, context_chars = context.chars().count(), "Answered question");
        Ok(answer)
    }

    async fn load_session(&self, session_id: Uuid) -> Result<CaptureSession> {
        if !self.inner.sessions_dir.join(session_id.to_string()).is_dir() {
            anyhow::bail!("Session {} not found", session_id);
        }
        let store = EventStore::open(&self.inner.sessions_dir, session_id).await?;
        store
            .load_session()
            .await?
            .with_context(|| format!("Session {} has no submission record", session_id))
    }

    /// Drive one session to a terminal status
    #[instrument(skip(self, store, blob, declared))]
    async fn process(
        &self,
        store: &EventStore,
        session_id: Uuid,
        owner_id: &str,
        blob: Vec<u8>,
        declared: Option<String>,
    ) {
        let started = Instant::now();

        let status = match self.run_stages(store, session_id, owner_id, &blob, declared).await {
            Ok(status) => status,
            Err(e) => {
                error!(%session_id, error = %e, "Session failed");
                let event = Event::new(
                    session_id,
                    None,
                    EventType::SessionFailed,
                    format!("{}:finish", session_id),
                    format!("Session failed: {}", e),
                    StepStatus::Failed,
                )
                .with_duration(started.elapsed().as_millis() as u64)
                .with_error(e.to_string(), Some(e.kind()));
                if let Err(log_err) = record(store, &event).await {
                    error!(%session_id, error = %log_err, "Failed to record session failure");
                }
                return;
            }
        };

        let event_type = match status {
            SessionStatus::Complete => EventType::SessionCompleted,
            _ => EventType::SessionPartial,
        };
        let event = Event::new(
            session_id,
            None,
            event_type,
            format!("{}:finish", session_id),
            format!("Session finished as {}", status),
            StepStatus::Completed,
        )
        .with_duration(started.elapsed().as_millis() as u64);
        if let Err(e) = record(store, &event).await {
            error!(%session_id, error = %e, "Failed to record session completion");
        }
        info!(%session_id, %status, "Session finished");
    }

    /// Required stages, then the enrichment stages side by side. An `Err`
    /// means a required stage failed.
    async fn run_stages(
        &self,
        store: &EventStore,
        session_id: Uuid,
        owner_id: &str,
        blob: &[u8],
        declared: Option<String>,
    ) -> PipelineResult<SessionStatus> {
        let settings = &self.inner.settings;

        let capture = self
            .run_stage(store, session_id, PipelineStage::Normalizing, blob, &settings.required_retry, || async {
                let capture = self.inner.normalizer.normalize(blob, declared.as_deref()).await?;
                let data = json!({
                    "encoding": capture.encoding,
                    "transcoded": capture.transcoded,
                });
                Ok((capture, Some(data)))
            })
            .await?;

        let transcript = self
            .run_stage(store, session_id, PipelineStage::Transcribing, &capture.bytes, &settings.required_retry, || async {
                let text = self.inner.transcriber.transcribe(&capture).await?;
                let transcript = Transcript {
                    session_id,
                    owner_id: owner_id.to_string(),
                    text: text.text,
                    language: text
                        .language
                        .as_deref()
                        .and_then(language_tag)
                        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
                    created_at: chrono::Utc::now(),
                };
                self.inner.db.insert_transcript(transcript.clone()).await?;
                let data = json!({
                    "chars": transcript.text.chars().count(),
                    "language": transcript.language,
                    "backend": self.inner.transcriber.name(),
                });
                Ok((transcript, Some(data)))
            })
            .await?;

        let text = transcript.text.as_str();
        let input = text.as_bytes();
        let policy = &settings.best_effort_retry;

        // fetched before indexing so a capture is never its own prior context
        let prior_context = with_timeout(
            settings.call_timeout,
            "context retrieval",
            self.inner.indexer.retrieve_context(owner_id, text, settings.context_k),
        )
        .await;

        let (todos, indexed, graph) = tokio::join!(
            self.run_stage(store, session_id, PipelineStage::ExtractingTodos, input, policy, || async {
                match self.inner.todos.extract(text).await? {
                    TodoProposal::Parsed(tasks) => {
                        let ids = self
                            .inner
                            .db
                            .insert_extracted_tasks(owner_id, Some(session_id), tasks)
                            .await?;
                        Ok(((), Some(json!({ "tasks": ids.len() }))))
                    }
                    TodoProposal::Malformed { reason } => Err(PipelineError::ParseFailure(reason)),
                }
            }),
            self.run_stage(store, session_id, PipelineStage::Indexing, input, policy, || async {
                let record = self.inner.indexer.index(owner_id, text).await?;
                Ok(((), Some(json!({ "record_id": record.map(|r| r.id) }))))
            }),
            self.run_stage(store, session_id, PipelineStage::UpdatingGraph, input, policy, || async {
                let context = prior_context.clone()?;
                let topics = self.inner.topics.extract(text, &context).await?;
                let summary = self.inner.graph.sync(owner_id, &topics).await?;
                Ok((
                    (),
                    Some(json!({
                        "nodes": summary.nodes.len(),
                        "edges_added": summary.edges_added,
                        "context_chars": context.chars().count(),
                    })),
                ))
            }),
        );

        let all_succeeded = todos.is_ok() && indexed.is_ok() && graph.is_ok();
        Ok(if all_succeeded {
            SessionStatus::Complete
        } else {
            SessionStatus::Partial
        })
    }

    /// Run one stage under `policy`, logging every attempt. `op` returns the
    /// stage value plus optional data for the completion event.
    async fn run_stage<T, Op, Fut>(
        &self,
        store: &EventStore,
        session_id: Uuid,
        stage: PipelineStage,
        input: &[u8],
        policy: &RetryPolicy,
        mut op: Op,
    ) -> PipelineResult<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = PipelineResult<(T, Option<serde_json::Value>)>>,
    {
        let key = generate_idempotency_key(session_id, stage, input);
        let timeout = self.inner.settings.call_timeout;
        let started = Instant::now();
        let mut last_attempt = 0u32;

        let result = policy
            .run(
                |attempt| {
                    last_attempt = attempt;
                    let fut = op();
                    let key = key.clone();
                    async move {
                        let event = Event::new(
                            session_id,
                            Some(stage),
                            EventType::StageStarted,
                            key,
                            format!("Stage '{}' attempt {}", stage, attempt),
                            StepStatus::Running,
                        )
                        .with_attempt(attempt);
                        record(store, &event).await?;
                        with_timeout(timeout, stage.as_str(), fut).await
                    }
                },
                |attempt, delay, e| {
                    let key = format!("{}:retry:{}", key, attempt);
                    async move {
                        warn!(
                            %session_id,
                            %stage,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Stage failed, retrying"
                        );
                        let event = Event::new(
                            session_id,
                            Some(stage),
                            EventType::StageRetrying,
                            key,
                            format!("Stage '{}' failed, retrying in {:?}: {}", stage, delay, e),
                            StepStatus::Running,
                        )
                        .with_attempt(attempt)
                        .with_error(e.to_string(), Some(e.kind()));
                        if let Err(log_err) = record(store, &event).await {
                            warn!(%session_id, error = %log_err, "Failed to record retry");
                        }
                    }
                },
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok((value, data)) => {
                let mut event = Event::new(
                    session_id,
                    Some(stage),
                    EventType::StageCompleted,
                    key,
                    format!("Stage '{}' completed in {}ms", stage, duration_ms),
                    StepStatus::Completed,
                )
                .with_duration(duration_ms);
                if let Some(data) = data {
                    event = event.with_data(data);
                }
                record(store, &event).await?;
                Ok(value)
            }
            Err(e) => {
                error!(
                    %session_id,
                    %stage,
                    attempt = last_attempt,
                    error = %e,
                    "Stage failed permanently"
                );
                let event = Event::new(
                    session_id,
                    Some(stage),
                    EventType::StageFailed,
                    key,
                    format!("Stage '{}' failed after {} attempts: {}", stage, last_attempt, e),
                    StepStatus::Failed,
                )
                .with_attempt(last_attempt)
                .with_duration(duration_ms)
                .with_error(e.to_string(), Some(e.kind()));
                if let Err(log_err) = record(store, &event).await {
                    warn!(%session_id, error = %log_err, "Failed to record stage failure");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CaptureSink for Orchestrator {
    async fn submit(
        &self,
        owner_id: &str,
        blob: Vec<u8>,
        declared_media_type: Option<String>,
    ) -> PipelineResult<Uuid> {
        Ok(self.submit_capture(owner_id, blob, declared_media_type).await?.id)
    }
}

fn storage_error(e: anyhow::Error) -> PipelineError {
    PipelineError::Storage(format!("{e:#}"))
}

async fn record(store: &EventStore, event: &Event) -> PipelineResult<()> {
    store.append(event).await.map_err(storage_error)
}
