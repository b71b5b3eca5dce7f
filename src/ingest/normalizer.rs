//! Format normalization.
//!
//! Decides what a capture is (declared MIME type first, magic bytes as the
//! fallback) and makes sure the bytes handed to transcription are in a
//! whitelisted encoding, transcoding through a scratch directory when not.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::adapters::Transcoder;
use crate::core::{with_timeout, PipelineError, PipelineResult};
use crate::domain::{Encoding, NormalizedCapture};

/// Default upper bound on a capture blob (25 MiB)
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 25 * 1024 * 1024;

pub struct FormatNormalizer {
    transcoder: Arc<dyn Transcoder>,
    max_capture_bytes: usize,
    call_timeout: Duration,
}

impl FormatNormalizer {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_capture_bytes(mut self, max: usize) -> Self {
        self.max_capture_bytes = max;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Identify the capture's encoding without converting anything
    pub fn detect(bytes: &[u8], declared_media_type: Option<&str>) -> Option<Encoding> {
        declared_media_type
            .and_then(Encoding::from_mime)
            .or_else(|| Encoding::sniff(bytes))
    }

    /// Produce a capture in a whitelisted encoding
    pub async fn normalize(
        &self,
        bytes: &[u8],
        declared_media_type: Option<&str>,
    ) -> PipelineResult<NormalizedCapture> {
        if bytes.is_empty() {
            return Err(PipelineError::UnsupportedFormat("capture is empty".to_string()));
        }
        if bytes.len() > self.max_capture_bytes {
            return Err(PipelineError::UnsupportedFormat(format!(
                "capture is {} bytes, limit is {}",
                bytes.len(),
                self.max_capture_bytes
            )));
        }

        let encoding = Self::detect(bytes, declared_media_type).ok_or_else(|| {
            PipelineError::UnsupportedFormat(format!(
                "unrecognised capture (declared: {})",
                declared_media_type.unwrap_or("none")
            ))
        })?;

        if encoding.is_whitelisted() {
            debug!(encoding = encoding.extension(), "Capture already in a supported encoding");
            return Ok(NormalizedCapture {
                bytes: bytes.to_vec(),
                encoding,
                transcoded: false,
            });
        }

        let target = Encoding::canonical_for(encoding.medium());
        info!(
            from = encoding.extension(),
            to = target.extension(),
            "Transcoding capture"
        );
        let converted = self.transcode(bytes, encoding, target).await?;

        Ok(NormalizedCapture {
            bytes: converted,
            encoding: target,
            transcoded: true,
        })
    }

    async fn transcode(&self, bytes: &[u8], from: Encoding, to: Encoding) -> PipelineResult<Vec<u8>> {
        // Removed when dropped, including when this future is cancelled
        let scratch = tempfile::tempdir()
            .map_err(|e| PipelineError::Storage(format!("create scratch dir: {e}")))?;
        let input = scratch.path().join(format!("input.{}", from.extension()));
        let output = scratch.path().join(format!("output.{}", to.extension()));

        tokio::fs::write(&input, bytes)
            .await
            .map_err(|e| PipelineError::Storage(format!("write scratch input: {e}")))?;

        with_timeout(
            self.call_timeout,
            "transcoder",
            self.transcoder.transcode(&input, &output, to),
        )
        .await?;

        let converted = tokio::fs::read(&output)
            .await
            .map_err(|e| PipelineError::ConversionFailed(format!("read transcoder output: {e}")))?;
        if converted.is_empty() {
            return Err(PipelineError::ConversionFailed("transcoder output is empty".to_string()));
        }
        Ok(converted)
    }
}
