//! Local whisper transcription backend.
//!
//! Shells out to a local whisper binary. Audio only; images are rejected as
//! a configuration problem since this backend cannot read them.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{Transcriber, TranscriptText};
use crate::core::{PipelineError, PipelineResult};
use crate::domain::{Medium, NormalizedCapture};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
}

/// Transcriber running the whisper CLI
pub struct WhisperCli {
    binary_path: String,
    model: String,
    language: Option<String>,
}

impl WhisperCli {
    pub fn new(binary_path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            language: None,
        }
    }

    /// Pin the spoken language instead of letting whisper detect it
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[async_trait]
impl Transcriber for WhisperCli {
    fn name(&self) -> &str {
        "whisper-cli"
    }

    async fn transcribe(&self, capture: &NormalizedCapture) -> PipelineResult<TranscriptText> {
        if capture.medium() != Medium::Audio {
            return Err(PipelineError::Misconfigured(
                "whisper-cli backend cannot transcribe images".to_string(),
            ));
        }

        // Scratch dir holds both the input and whisper's JSON output
        let temp_dir = tempfile::tempdir()
            .map_err(|e| PipelineError::Storage(format!("create scratch dir: {e}")))?;
        let audio_path = temp_dir.path().join(capture.file_name());
        tokio::fs::write(&audio_path, &capture.bytes)
            .await
            .map_err(|e| PipelineError::Storage(format!("write scratch input: {e}")))?;

        debug!(model = %self.model, path = %audio_path.display(), "Running whisper");

        let mut command = Command::new(&self.binary_path);
        command
            .arg(&audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json");
        if let Some(language) = &self.language {
            command.arg("--language").arg(language);
        }

        let output = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::Misconfigured(format!("failed to run {}: {e}", self.binary_path))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Transient(format!(
                "whisper failed: {}",
                stderr.trim()
            )));
        }

        let json_path = temp_dir.path().join("capture.json");
        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| PipelineError::ParseFailure(format!("read whisper output: {e}")))?;

        let whisper: WhisperOutput = serde_json::from_str(&json_content)
            .map_err(|e| PipelineError::ParseFailure(format!("parse whisper JSON: {e}")))?;

        Ok(TranscriptText {
            text: whisper.text.trim().to_string(),
            language: if whisper.language.is_empty() {
                self.language.clone()
            } else {
                Some(whisper.language)
            },
        })
    }
}
