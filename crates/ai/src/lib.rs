//! `medscribe-ai`
//!
//! **Responsibility:** the AI backend boundary (speech-to-text, completion,
//! summarization).
//!
//! This is the only crate that talks to a third-party AI service, so it is also
//! the only place retry policy lives:
//! - [`AiBackend`] is the contract the job workers call.
//! - [`RetryingBackend`] wraps any backend with a [`RetryPolicy`].
//! - [`OpenAiBackend`] is the production HTTP implementation.
//! - [`FakeBackend`] scripts outcomes for tests and local runs.

pub mod backend;
pub mod error;
pub mod fake;
pub mod openai;
pub mod retry;

pub use backend::AiBackend;
pub use error::AiError;
pub use fake::{FakeBackend, FakeCall, FakeOp};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use retry::{RetryPolicy, RetryingBackend};
