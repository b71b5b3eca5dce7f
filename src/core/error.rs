//! Error taxonomy shared by every pipeline stage.
//!
//! Each variant maps to an [`ErrorKind`], which is what retry policies and
//! stage outcomes reason about. Whether an error aborts a session depends on
//! the stage that raised it, not on the error alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by pipeline stages and their collaborators
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Network failure, 5xx, or a call that exceeded its timeout
    #[error("transient failure: {0}")]
    Transient(String),

    /// Provider rate limit or quota
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Provider credentials absent or rejected
    #[error("credentials missing: {0}")]
    CredentialsMissing(String),

    /// Provider or local configuration is unusable
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    /// The capture is not audio or an image we can handle
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The transcoder could not convert the capture
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// Provider output did not have the expected shape
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Input or requested mutation violates a model invariant
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// Storage read/write failed
    #[error("storage error: {0}")]
    Storage(String),
}

/// Discriminant of [`PipelineError`], used in policies and stage outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    QuotaExceeded,
    CredentialsMissing,
    Misconfigured,
    UnsupportedFormat,
    ConversionFailed,
    ParseFailure,
    ValidationFailure,
    Storage,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::CredentialsMissing(_) => ErrorKind::CredentialsMissing,
            Self::Misconfigured(_) => ErrorKind::Misconfigured,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::ConversionFailed(_) => ErrorKind::ConversionFailed,
            Self::ParseFailure(_) => ErrorKind::ParseFailure,
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Configuration errors are surfaced to the caller as such and never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CredentialsMissing(_) | Self::Misconfigured(_)
        )
    }
}

impl ErrorKind {
    /// Kinds the default retry policies retry on
    pub fn default_retryable() -> Vec<ErrorKind> {
        vec![ErrorKind::Transient, ErrorKind::QuotaExceeded, ErrorKind::Storage]
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return from_http_status(status.as_u16(), &e.to_string());
        }
        // connect, timeout, body decode all count as transient
        Self::Transient(e.to_string())
    }
}

/// Map an HTTP status from a provider onto the taxonomy
pub fn from_http_status(status: u16, message: &str) -> PipelineError {
    match status {
        401 | 403 => PipelineError::CredentialsMissing(format!("HTTP {status}: {message}")),
        429 => PipelineError::QuotaExceeded(format!("HTTP {status}: {message}")),
        408 | 500..=599 => PipelineError::Transient(format!("HTTP {status}: {message}")),
        _ => PipelineError::Misconfigured(format!("HTTP {status}: {message}")),
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(from_http_status(401, "").kind(), ErrorKind::CredentialsMissing);
        assert_eq!(from_http_status(403, "").kind(), ErrorKind::CredentialsMissing);
        assert_eq!(from_http_status(429, "").kind(), ErrorKind::QuotaExceeded);
        assert_eq!(from_http_status(503, "").kind(), ErrorKind::Transient);
        assert_eq!(from_http_status(400, "").kind(), ErrorKind::Misconfigured);
    }

    #[test]
    fn test_configuration_errors() {
        assert!(PipelineError::CredentialsMissing("k".into()).is_configuration());
        assert!(PipelineError::Misconfigured("m".into()).is_configuration());
        assert!(!PipelineError::Transient("t".into()).is_configuration());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::QuotaExceeded).unwrap();
        assert_eq!(json, "\"quota_exceeded\"");
    }
}
