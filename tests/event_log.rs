//! Session Event Log Integration Tests
//!
//! Event log format and ordering as written by real pipeline runs.

mod common;

use std::time::Duration;

use common::{fast_settings, harness, harness_with, wav_bytes, FakeEmbedder, FakeLanguageModel, FakeTranscriber};
use neuromap::core::{generate_idempotency_key, hash_input, ErrorKind, EventStore, PipelineSettings};
use neuromap::domain::{CaptureSession, EventType, PipelineStage, SessionStatus};
use uuid::Uuid;

#[test]
fn test_idempotency_key_format() {
    let session_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
    let key = generate_idempotency_key(session_id, PipelineStage::ExtractingTodos, b"some text");

    let parts: Vec<&str> = key.split(':').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "550e8400-e29b-41d4-a716-446655440000");
    assert_eq!(parts[1], "extracting_todos");
    assert_eq!(parts[2], hash_input(b"some text"));
    assert_eq!(parts[2].len(), 16);
}

#[tokio::test]
async fn test_log_order_for_complete_session() {
    let h = harness(
        FakeTranscriber::new("remember to buy milk"),
        FakeLanguageModel::new(r#"[{"text": "buy milk"}]"#, r#"[{"name": "Groceries"}]"#),
        FakeEmbedder::default(),
    );
    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    h.orchestrator.wait_for(id).await.unwrap();

    let store = EventStore::open(&h.dir.path().join("sessions"), id).await.unwrap();
    let events = store.replay().await.unwrap();

    assert_eq!(events.first().unwrap().event_type, EventType::SessionSubmitted);
    assert_eq!(events.last().unwrap().event_type, EventType::SessionCompleted);
    assert!(events.iter().all(|e| e.session_id == id));

    // every stage starts before it completes, with matching keys
    for stage in [
        PipelineStage::Normalizing,
        PipelineStage::Transcribing,
        PipelineStage::ExtractingTodos,
        PipelineStage::Indexing,
        PipelineStage::UpdatingGraph,
    ] {
        let started = events
            .iter()
            .position(|e| e.stage == Some(stage) && e.event_type == EventType::StageStarted)
            .unwrap();
        let completed = events
            .iter()
            .position(|e| e.stage == Some(stage) && e.event_type == EventType::StageCompleted)
            .unwrap();
        assert!(started < completed, "{stage}");
        assert_eq!(events[started].idempotency_key, events[completed].idempotency_key);
        assert!(events[completed].duration_ms.is_some());
    }

    // replaying the log gives the same state the orchestrator reports
    let replayed = CaptureSession::from_events(&events).unwrap();
    assert_eq!(replayed.status, SessionStatus::Complete);
    assert_eq!(replayed.owner_id, "alice");

    // the transcript text never lands in the log
    let raw = tokio::fs::read_to_string(store.events_path()).await.unwrap();
    assert!(!raw.contains("buy milk"));
}

#[tokio::test]
async fn test_timeouts_are_transient_and_retried() {
    let settings = PipelineSettings {
        call_timeout: Duration::from_millis(50),
        ..fast_settings()
    };
    let h = harness_with(
        FakeTranscriber::new("never arrives").slow(Duration::from_secs(5)),
        FakeLanguageModel::new("[]", "[]"),
        FakeEmbedder::default(),
        settings,
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    let transcribing = &session.stages[&PipelineStage::Transcribing];
    assert_eq!(transcribing.attempts, 3);
    assert_eq!(transcribing.error_kind, Some(ErrorKind::Transient));
    assert!(session.failure_reason.unwrap().contains("timed out"));
}
