//! Adapter interfaces for external systems.
//!
//! Every provider the pipeline talks to sits behind one of these traits, so
//! the orchestrator can be driven by fakes in tests:
//! - [`Transcriber`]: capture bytes to text (speech-to-text or vision OCR)
//! - [`LanguageModel`]: prompt to completion text
//! - [`Embedder`]: text to vector
//! - [`Transcoder`]: converts a capture file into a whitelisted encoding

pub mod ffmpeg;
pub mod openai;
pub mod whisper_cli;

use std::path::Path;

use async_trait::async_trait;

use crate::core::PipelineResult;
use crate::domain::{Encoding, NormalizedCapture};

pub use ffmpeg::FfmpegTranscoder;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use whisper_cli::WhisperCli;

/// Prompt sent alongside images to the vision model
pub const IMAGE_TRANSCRIBE_PROMPT: &str =
    "Transcribe the text. Only output the resulting transcribed text.";

/// Text recovered from a capture
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptText {
    pub text: String,

    /// Language tag, if the backend reported one
    pub language: Option<String>,
}

impl TranscriptText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Recover the text of a normalized capture. Empty text is a valid result.
    async fn transcribe(&self, capture: &NormalizedCapture) -> PipelineResult<TranscriptText>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Complete `prompt` under the `system` instructions
    async fn complete(&self, system: &str, prompt: &str) -> PipelineResult<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>>;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert the file at `input` into `target`, written at `output`
    async fn transcode(&self, input: &Path, output: &Path, target: Encoding) -> PipelineResult<()>;
}
