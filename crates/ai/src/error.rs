use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    /// The provider asked us to slow down. The only retryable failure.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other provider or transport failure.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Retries were exhausted.
    #[error("backend unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl AiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AiError::RateLimited(_))
    }
}
