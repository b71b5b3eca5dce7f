//! OpenAI-compatible HTTP client.
//!
//! One client serves transcription (audio via `/audio/transcriptions`,
//! images via a vision chat completion), chat completions and embeddings.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Embedder, LanguageModel, Transcriber, TranscriptText, IMAGE_TRANSCRIBE_PROMPT};
use crate::core::error::from_http_status;
use crate::core::{PipelineError, PipelineResult};
use crate::domain::records::language_tag;
use crate::domain::{Medium, NormalizedCapture};

/// Connection and model settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Resolved key; `None` makes every call fail with `CredentialsMissing`
    pub api_key: Option<String>,
    pub transcription_model: String,
    pub vision_model: String,
    pub chat_model: String,
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            transcription_model: "whisper-1".to_string(),
            vision_model: "gpt-4o-mini".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Client for an OpenAI-compatible API
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> PipelineResult<&str> {
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(PipelineError::CredentialsMissing(
                "no API key configured for the OpenAI provider".to_string(),
            )),
        }
    }

    /// Turn a non-success status into the matching error kind
    async fn check(response: reqwest::Response) -> PipelineResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(from_http_status(status.as_u16(), body.trim()))
    }

    async fn chat(&self, model: &str, messages: serde_json::Value) -> PipelineResult<String> {
        let key = self.api_key()?;
        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(key)
            .json(&json!({
                "model": model,
                "messages": messages,
                "temperature": 0,
            }))
            .send()
            .await?;

        let parsed: ChatResponse = Self::check(response).await?.json().await.map_err(|e| {
            PipelineError::ParseFailure(format!("chat completion response: {e}"))
        })?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn transcribe_audio(&self, capture: &NormalizedCapture) -> PipelineResult<TranscriptText> {
        let key = self.api_key()?;
        let file_part = Part::bytes(capture.bytes.clone())
            .file_name(capture.file_name())
            .mime_str(capture.encoding.mime_type())
            .map_err(|e| PipelineError::Misconfigured(format!("mime type: {e}")))?;

        let form = Form::new()
            .text("model", self.config.transcription_model.clone())
            .text("response_format", "verbose_json")
            .part("file", file_part);

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await?;

        let parsed: TranscriptionResponse = Self::check(response).await?.json().await.map_err(|e| {
            PipelineError::ParseFailure(format!("transcription response: {e}"))
        })?;

        Ok(TranscriptText {
            text: parsed.text.trim().to_string(),
            // verbose_json reports a language name such as "english"
            language: parsed.language.as_deref().and_then(language_tag),
        })
    }

    async fn transcribe_image(&self, capture: &NormalizedCapture) -> PipelineResult<TranscriptText> {
        let data_url = format!(
            "data:{};base64,{}",
            capture.encoding.mime_type(),
            BASE64.encode(&capture.bytes)
        );
        let messages = json!([{
            "role": "user",
            "content": [
                { "type": "text", "text": IMAGE_TRANSCRIBE_PROMPT },
                { "type": "image_url", "image_url": { "url": data_url } },
            ],
        }]);

        let text = self.chat(&self.config.vision_model, messages).await?;
        Ok(TranscriptText::new(text.trim()))
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn transcribe(&self, capture: &NormalizedCapture) -> PipelineResult<TranscriptText> {
        debug!(
            encoding = capture.encoding.extension(),
            bytes = capture.bytes.len(),
            "Transcribing capture"
        );
        match capture.medium() {
            Medium::Audio => self.transcribe_audio(capture).await,
            Medium::Image => self.transcribe_image(capture).await,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, prompt: &str) -> PipelineResult<String> {
        let messages = json!([
            { "role": "system", "content": system },
            { "role": "user", "content": prompt },
        ]);
        self.chat(&self.config.chat_model, messages).await
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        let key = self.api_key()?;
        let response = self
            .client
            .post(self.url("embeddings"))
            .bearer_auth(key)
            .json(&json!({
                "model": self.config.embedding_model,
                "input": text,
            }))
            .send()
            .await?;

        let parsed: EmbeddingResponse = Self::check(response).await?.json().await.map_err(|e| {
            PipelineError::ParseFailure(format!("embedding response: {e}"))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PipelineError::ParseFailure("embedding response had no vector".to_string()))
    }
}
