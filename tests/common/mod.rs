//! Fake providers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use neuromap::adapters::{Embedder, LanguageModel, Transcoder, TranscriptText, Transcriber};
use neuromap::core::{Orchestrator, PipelineError, PipelineResult, PipelineSettings, ProviderSet, RetryPolicy};
use neuromap::domain::{Encoding, NormalizedCapture};
use neuromap::store::Database;
use tempfile::TempDir;

/// A minimal WAV header; enough for the format sniffer
pub fn wav_bytes() -> Vec<u8> {
    let mut bytes = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
    bytes.extend_from_slice(&[0u8; 32]);
    bytes
}

/// Returns scripted results in order, then `fallback` forever
pub struct FakeTranscriber {
    script: Mutex<VecDeque<PipelineResult<String>>>,
    fallback: String,
    language: Option<String>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: text.to_string(),
            language: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, result: PipelineResult<String>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Language the backend reports alongside every transcript
    pub fn reporting_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe(&self, _capture: &NormalizedCapture) -> PipelineResult<TranscriptText> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(result) => result?,
            None => self.fallback.clone(),
        };
        Ok(TranscriptText {
            text,
            language: self.language.clone(),
        })
    }
}

/// Answers todo, topic and chat prompts with canned output, recording every
/// `(system, prompt)` pair it sees
pub struct FakeLanguageModel {
    pub todos: PipelineResult<String>,
    pub topics: PipelineResult<String>,
    pub reply: String,
    pub prompts: Mutex<Vec<(String, String)>>,
    pub calls: AtomicUsize,
}

impl FakeLanguageModel {
    pub fn new(todos: &str, topics: &str) -> Self {
        Self {
            todos: Ok(todos.to_string()),
            topics: Ok(topics.to_string()),
            reply: "I don't know.".to_string(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    /// Prompts sent under a system prompt containing `marker`
    pub fn prompts_for(&self, marker: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| system.contains(marker))
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for FakeLanguageModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, system: &str, prompt: &str) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), prompt.to_string()));
        if system.contains("tasks") {
            self.todos.clone()
        } else if system.contains("mind map") {
            self.topics.clone()
        } else {
            Ok(self.reply.clone())
        }
    }
}

/// Bag-of-letters embedding: similar words land close together
#[derive(Default)]
pub struct FakeEmbedder {
    pub fail: bool,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        if self.fail {
            return Err(PipelineError::QuotaExceeded("embedding quota".to_string()));
        }
        let mut vector = vec![0.01f32; 26];
        for c in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
            vector[(c - b'a') as usize] += 1.0;
        }
        Ok(vector)
    }
}

/// Copies input to output, counting calls
#[derive(Default)]
pub struct CopyTranscoder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, _target: Encoding) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| PipelineError::ConversionFailed(e.to_string()))?;
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub transcriber: Arc<FakeTranscriber>,
    pub model: Arc<FakeLanguageModel>,
    pub transcoder: Arc<CopyTranscoder>,
    pub dir: TempDir,
}

/// Retry policies with millisecond delays
pub fn fast_settings() -> PipelineSettings {
    let fast = |max_attempts| RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        ..RetryPolicy::required()
    };
    PipelineSettings {
        required_retry: fast(3),
        best_effort_retry: fast(2),
        call_timeout: Duration::from_secs(5),
        ..PipelineSettings::default()
    }
}

pub fn harness(transcriber: FakeTranscriber, model: FakeLanguageModel, embedder: FakeEmbedder) -> Harness {
    harness_with(transcriber, model, embedder, fast_settings())
}

pub fn harness_with(
    transcriber: FakeTranscriber,
    model: FakeLanguageModel,
    embedder: FakeEmbedder,
    settings: PipelineSettings,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let transcriber = Arc::new(transcriber);
    let model = Arc::new(model);
    let transcoder = Arc::new(CopyTranscoder::default());

    let providers = ProviderSet {
        transcriber: transcriber.clone(),
        language_model: model.clone(),
        embedder: Arc::new(embedder),
        transcoder: transcoder.clone(),
    };
    let orchestrator = Orchestrator::new(
        Database::in_memory().unwrap(),
        dir.path().join("sessions"),
        providers,
        settings,
    );

    Harness {
        orchestrator,
        transcriber,
        model,
        transcoder,
        dir,
    }
}
