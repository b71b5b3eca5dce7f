//! ffmpeg transcoder.
//!
//! Shells out to ffmpeg to convert captures into a whitelisted encoding.
//! The child is killed if the future driving it is dropped.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::Transcoder;
use crate::core::{PipelineError, PipelineResult};
use crate::domain::{Encoding, Medium};

/// Transcoder backed by an ffmpeg binary
pub struct FfmpegTranscoder {
    binary_path: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    fn output_args(target: Encoding) -> Vec<&'static str> {
        match target.medium() {
            // 16 kHz mono PCM is what speech models expect
            Medium::Audio => vec!["-vn", "-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"],
            Medium::Image => vec!["-frames:v", "1", "-q:v", "2"],
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, target: Encoding) -> PipelineResult<()> {
        debug!(
            input = %input.display(),
            target = target.extension(),
            "Running ffmpeg"
        );

        let result = Command::new(&self.binary_path)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(Self::output_args(target))
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::Misconfigured(format!("failed to run {}: {e}", self.binary_path))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(PipelineError::ConversionFailed(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(PipelineError::ConversionFailed(
                "ffmpeg reported success but wrote no output".to_string(),
            ));
        }
        Ok(())
    }
}
