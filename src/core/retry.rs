//! Retry and timeout policy applied around external calls.
//!
//! A single [`RetryPolicy`] describes how many attempts a stage gets, how the
//! delay between attempts grows, and which error kinds are worth retrying.
//! The orchestrator owns one policy for required stages and one for
//! best-effort stages.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, PipelineError, PipelineResult};

/// Retry policy for a pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Error kinds that trigger another attempt
    #[serde(default = "ErrorKind::default_retryable")]
    pub retry_on: Vec<ErrorKind>,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::required()
    }
}

impl RetryPolicy {
    /// Policy for stages the session cannot do without
    pub fn required() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            retry_on: ErrorKind::default_retryable(),
        }
    }

    /// Policy for enrichment stages: one retry, then give up
    pub fn best_effort() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 500,
            ..Self::required()
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::required()
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Whether the error is one this policy retries
    pub fn is_retryable(&self, error: &PipelineError) -> bool {
        !error.is_configuration() && self.retry_on.contains(&error.kind())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `on_retry` is awaited before each backoff
    /// sleep with the failed attempt number, the delay and the error.
    pub async fn run<T, Op, Fut, Hook, HookFut>(
        &self,
        mut op: Op,
        mut on_retry: Hook,
    ) -> PipelineResult<T>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
        Hook: FnMut(u32, Duration, PipelineError) -> HookFut,
        HookFut: Future<Output = ()>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if self.is_retryable(&e) && self.should_retry(attempt) => {
                    let delay = self.delay_for_attempt(attempt);
                    on_retry(attempt, delay, e).await;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Await `fut` for at most `limit`; an elapsed timer becomes `Transient`
pub async fn with_timeout<T, Fut>(limit: Duration, what: &str, fut: Fut) -> PipelineResult<T>
where
    Fut: Future<Output = PipelineResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Transient(format!(
            "{what} timed out after {limit:?}"
        ))),
    }
}
