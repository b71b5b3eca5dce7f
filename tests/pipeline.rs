//! Pipeline Integration Tests
//!
//! End-to-end session processing with fake providers: terminal statuses,
//! retries, cancellation and the records each session leaves behind.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{harness, wav_bytes, FakeEmbedder, FakeLanguageModel, FakeTranscriber};
use neuromap::chat::ChatTurn;
use neuromap::core::{EventStore, PipelineError};
use neuromap::domain::{ConceptKind, EventType, PipelineStage, SessionStatus, StepStatus};

const NOTE: &str = "I need to call the bank tomorrow, urgent! TODO: renew passport";
const TODOS: &str = r#"[{"text": "Call the bank tomorrow, urgent!"}, {"text": "TODO: renew passport"}]"#;
const TOPICS: &str = r#"[{"name": "Banking", "info": ["call tomorrow"]}, {"name": "Passport", "info": ["renew"]}]"#;

#[tokio::test]
async fn test_complete_session() {
    let h = harness(
        FakeTranscriber::new(NOTE),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let pending = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), Some("audio/wav".to_string()))
        .await
        .unwrap();
    assert_eq!(pending.status, SessionStatus::Pending);

    let session = h.orchestrator.wait_for(pending.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Complete);
    assert!(session.completed_at.is_some());
    assert!(session.failure_reason.is_none());

    let report = h.orchestrator.get_session(pending.id).await.unwrap();
    assert_eq!(report.transcript.unwrap().text, NOTE);
    assert!(report.indexed);
    assert!(report.graph_updated);
    assert_eq!(report.todos.len(), 2);
    assert_eq!(report.todos[1].task.text, "renew passport");
    for tree in &report.todos {
        assert_eq!(tree.task.source_session, Some(pending.id));
    }

    let graph = h.orchestrator.get_graph("alice").await.unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.nodes[0].kind, ConceptKind::Primary);

    // Nothing leaks to other owners
    assert!(h.orchestrator.get_graph("bob").await.unwrap().nodes.is_empty());
    assert_eq!(h.transcoder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_todos_make_session_partial() {
    let h = harness(
        FakeTranscriber::new(NOTE),
        FakeLanguageModel::new("Sure! Here are your tasks: call the bank", TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Partial);
    let todos = &session.stages[&PipelineStage::ExtractingTodos];
    assert_eq!(todos.status, StepStatus::Failed);
    // parse failures are not retried
    assert_eq!(todos.attempts, 1);

    let report = h.orchestrator.get_session(id).await.unwrap();
    assert!(report.todos.is_empty());
    assert!(report.transcript.is_some());
    assert!(report.indexed);
    assert!(report.graph_updated);
}

#[tokio::test]
async fn test_embedding_outage_is_partial_not_failed() {
    let h = harness(
        FakeTranscriber::new(NOTE),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder { fail: true },
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Partial);
    let indexing = &session.stages[&PipelineStage::Indexing];
    assert_eq!(indexing.status, StepStatus::Failed);
    assert_eq!(indexing.attempts, 2);
    assert!(session.stage_succeeded(PipelineStage::ExtractingTodos));

    let report = h.orchestrator.get_session(id).await.unwrap();
    assert_eq!(report.todos.len(), 2);
    assert!(!report.indexed);
}

#[tokio::test]
async fn test_required_stage_failure_fails_session() {
    let h = harness(
        FakeTranscriber::new(NOTE).then(Err(PipelineError::CredentialsMissing("no key".to_string()))),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.failure_reason.unwrap().contains("credentials"));
    // configuration errors are never retried
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);
    assert!(!session.stages.contains_key(&PipelineStage::ExtractingTodos));

    let report = h.orchestrator.get_session(id).await.unwrap();
    assert!(report.transcript.is_none());
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unsupported_capture_fails_in_normalizing() {
    let h = harness(
        FakeTranscriber::new(NOTE),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", b"%PDF-1.7 not a capture".to_vec(), Some("application/pdf".to_string()))
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    let normalizing = &session.stages[&PipelineStage::Normalizing];
    assert_eq!(normalizing.status, StepStatus::Failed);
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transient_transcription_is_retried() {
    let h = harness(
        FakeTranscriber::new(NOTE).then(Err(PipelineError::Transient("503".to_string()))),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.stages[&PipelineStage::Transcribing].attempts, 2);

    let store = EventStore::open(&h.dir.path().join("sessions"), id).await.unwrap();
    let events = store.replay().await.unwrap();
    let retries: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::StageRetrying)
        .collect();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].stage, Some(PipelineStage::Transcribing));
    assert_eq!(events.last().unwrap().event_type, EventType::SessionCompleted);
}

#[tokio::test]
async fn test_non_whitelisted_audio_is_transcoded() {
    let h = harness(
        FakeTranscriber::new(NOTE),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", b"#!AMR\n0123456789".to_vec(), Some("audio/amr".to_string()))
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(h.transcoder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_transcript_completes_without_enrichment() {
    let h = harness(
        FakeTranscriber::new("   "),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    let session = h.orchestrator.wait_for(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    let report = h.orchestrator.get_session(id).await.unwrap();
    assert!(report.todos.is_empty());
    assert!(h.orchestrator.get_graph("alice").await.unwrap().nodes.is_empty());
}

#[tokio::test]
async fn test_cancel_running_session() {
    let h = harness(
        FakeTranscriber::new(NOTE).slow(Duration::from_secs(30)),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.orchestrator.cancel(id).await.unwrap());
    let session = h.orchestrator.wait_for(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure_reason.as_deref(), Some("cancelled"));

    // already finished
    assert!(!h.orchestrator.cancel(id).await.unwrap());
}

#[tokio::test]
async fn test_blank_owner_is_rejected() {
    let h = harness(
        FakeTranscriber::new(NOTE),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let err = h
        .orchestrator
        .submit_capture("  ", wav_bytes(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ValidationFailure(_)));
}

#[tokio::test]
async fn test_list_sessions_newest_first() {
    let h = harness(
        FakeTranscriber::new(NOTE),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let mut ids = Vec::new();
    for owner in ["alice", "bob", "alice"] {
        let id = h
            .orchestrator
            .submit_capture(owner, wav_bytes(), None)
            .await
            .unwrap()
            .id;
        h.orchestrator.wait_for(id).await.unwrap();
        ids.push(id);
    }

    let all = h.orchestrator.list_sessions(None, 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, ids[2]);

    let alice = h.orchestrator.list_sessions(Some("alice"), 1).await.unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].id, ids[2]);

    assert!(h.orchestrator.get_session(uuid::Uuid::new_v4()).await.is_err());
}

#[tokio::test]
async fn test_context_comes_from_prior_captures() {
    let h = harness(
        FakeTranscriber::new("the garden needs watering"),
        FakeLanguageModel::new("[]", "[]"),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    h.orchestrator.wait_for(id).await.unwrap();

    let context = h
        .orchestrator
        .retrieve_context("alice", "garden watering", 5)
        .await
        .unwrap();
    assert_eq!(context, "the garden needs watering");
    assert_eq!(h.orchestrator.retrieve_context("bob", "garden", 5).await.unwrap(), "");
}

#[tokio::test]
async fn test_capture_is_never_its_own_prior_context() {
    let h = harness(
        FakeTranscriber::new("zebra quantum pancake"),
        FakeLanguageModel::new("[]", TOPICS),
        FakeEmbedder::default(),
    );

    for _ in 0..2 {
        let id = h
            .orchestrator
            .submit_capture("alice", wav_bytes(), None)
            .await
            .unwrap()
            .id;
        let session = h.orchestrator.wait_for(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Complete);
    }

    let prompts = h.model.prompts_for("mind map");
    assert_eq!(prompts.len(), 2);

    // first ever capture: nothing earlier to relate to
    assert!(prompts[0].contains("consistently):\n(none)\n"));
    assert_eq!(prompts[0].matches("zebra quantum pancake").count(), 1);

    // second capture sees the first one only
    assert_eq!(prompts[1].matches("zebra quantum pancake").count(), 2);
}

#[tokio::test]
async fn test_waiter_sees_cancelled_status() {
    let h = harness(
        FakeTranscriber::new(NOTE).slow(Duration::from_secs(30)),
        FakeLanguageModel::new(TODOS, TOPICS),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;

    let waiter = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.wait_for(id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.orchestrator.cancel(id).await.unwrap());
    let session = waiter.await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure_reason.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_ask_answers_from_owner_notes() {
    let h = harness(
        FakeTranscriber::new("renew passport before the trip"),
        FakeLanguageModel::new("[]", "[]").with_reply("Renew your passport first."),
        FakeEmbedder::default(),
    );

    let id = h
        .orchestrator
        .submit_capture("alice", wav_bytes(), None)
        .await
        .unwrap()
        .id;
    h.orchestrator.wait_for(id).await.unwrap();

    let history = vec![
        ChatTurn::user("what's coming up?"),
        ChatTurn::assistant("a trip"),
    ];
    let answer = h
        .orchestrator
        .ask("alice", "what do I need before the trip?", &history)
        .await
        .unwrap();
    assert_eq!(answer, "Renew your passport first.");

    // bob has no notes, so nothing of alice's leaks into his prompt
    h.orchestrator.ask("bob", "what about the trip?", &[]).await.unwrap();

    let prompts = h.model.prompts_for("questions about the user's own notes");
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("renew passport before the trip"));
    assert!(prompts[0].contains("user: what's coming up?\nassistant: a trip"));
    assert!(prompts[0].ends_with("user: what do I need before the trip?\nassistant:"));
    assert!(!prompts[1].contains("passport"));

    assert!(h.orchestrator.ask("alice", "  ", &[]).await.is_err());
}

#[tokio::test]
async fn test_reported_language_name_becomes_tag() {
    for (reported, stored) in [("english", "en"), ("Spanish", "es"), ("pt-BR", "pt"), ("klingon", "en")] {
        let h = harness(
            FakeTranscriber::new(NOTE).reporting_language(reported),
            FakeLanguageModel::new(TODOS, TOPICS),
            FakeEmbedder::default(),
        );

        let id = h
            .orchestrator
            .submit_capture("alice", wav_bytes(), None)
            .await
            .unwrap()
            .id;
        h.orchestrator.wait_for(id).await.unwrap();

        let report = h.orchestrator.get_session(id).await.unwrap();
        assert_eq!(report.transcript.unwrap().language, stored, "reported {reported}");
    }
}
