//! Retry policy for AI backend calls.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backend::AiBackend;
use crate::error::AiError;

/// Retry policy configuration.
///
/// Only failures accepted by the `retryable` predicate are retried; everything
/// else propagates on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Factor applied to the delay after each further failure.
    pub multiplier: f64,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Which failures are worth another attempt.
    pub retryable: fn(&AiError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            retryable: AiError::is_rate_limited,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay after a failed attempt (1-indexed).
    ///
    /// Saturates at `max_delay` once the exponential term stops being representable.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn is_retryable(&self, error: &AiError) -> bool {
        (self.retryable)(error)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Exhaustion yields [`AiError::Unavailable`].
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, AiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if self.is_retryable(&error) => {
                    if attempt >= self.max_attempts {
                        warn!(operation, attempts = attempt, error = %error, "retries exhausted");
                        return Err(AiError::Unavailable {
                            attempts: attempt,
                            last_error: error.to_string(),
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retryable backend failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Backend decorator applying a [`RetryPolicy`] to every call.
#[derive(Debug, Clone)]
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B> RetryingBackend<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<B: AiBackend> AiBackend for RetryingBackend<B> {
    async fn transcribe(
        &self,
        audio: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, AiError> {
        self.policy
            .run("transcribe", move || {
                self.inner.transcribe(audio, content_type, filename)
            })
            .await
    }

    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        self.policy
            .run("complete", move || self.inner.complete(prompt))
            .await
    }

    async fn summarize(&self, corpus: &str) -> Result<String, AiError> {
        self.policy
            .run("summarize", move || self.inner.summarize(corpus))
            .await
    }
}
