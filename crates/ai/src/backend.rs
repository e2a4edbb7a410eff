use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AiError;

/// External AI operations used by the job workers.
///
/// Implementations must not touch application state; they turn inputs into text.
#[async_trait]
pub trait AiBackend: Send + Sync + 'static {
    /// Speech-to-text for one recording. `filename` is the name it was uploaded under.
    async fn transcribe(
        &self,
        audio: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, AiError>;

    /// Free-form completion of a clinician's prompt.
    async fn complete(&self, prompt: &str) -> Result<String, AiError>;

    /// Summary report of a consultation corpus.
    async fn summarize(&self, corpus: &str) -> Result<String, AiError>;
}

#[async_trait]
impl<B: AiBackend + ?Sized> AiBackend for Arc<B> {
    async fn transcribe(
        &self,
        audio: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, AiError> {
        (**self).transcribe(audio, content_type, filename).await
    }

    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        (**self).complete(prompt).await
    }

    async fn summarize(&self, corpus: &str) -> Result<String, AiError> {
        (**self).summarize(corpus).await
    }
}
