//! Scriptable in-process backend.
//!
//! Used by the test suites in place of a real provider. Queued replies are
//! consumed per operation in FIFO order; once a queue is empty the backend
//! answers deterministically from its input.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::AiBackend;
use crate::error::AiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Transcribe,
    Complete,
    Summarize,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub op: FakeOp,
    /// Prompt or corpus text; for transcription, the audio bytes as lossy UTF-8.
    pub input: String,
}

#[derive(Debug, Default)]
struct FakeState {
    replies: HashMap<FakeOp, VecDeque<Result<String, AiError>>>,
    latency: HashMap<FakeOp, VecDeque<Duration>>,
    calls: Vec<FakeCall>,
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unanswered call to `op`.
    pub fn reply(&self, op: FakeOp, outcome: Result<String, AiError>) -> &Self {
        let mut state = self.lock();
        state.replies.entry(op).or_default().push_back(outcome);
        self
    }

    /// Queue a delay for the next call to `op`, applied before it answers.
    pub fn delay(&self, op: FakeOp, latency: Duration) -> &Self {
        let mut state = self.lock();
        state.latency.entry(op).or_default().push_back(latency);
        self
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: FakeOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn answer(&self, op: FakeOp, input: String) -> Result<String, AiError> {
        let (latency, scripted) = {
            let mut state = self.lock();
            let latency = state.latency.get_mut(&op).and_then(VecDeque::pop_front);
            let scripted = state.replies.get_mut(&op).and_then(VecDeque::pop_front);
            state.calls.push(FakeCall {
                op,
                input: input.clone(),
            });
            (latency, scripted)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        scripted.unwrap_or_else(|| Ok(default_answer(op, &input)))
    }
}

fn default_answer(op: FakeOp, input: &str) -> String {
    match op {
        FakeOp::Transcribe => input.to_string(),
        FakeOp::Complete => format!("completion: {input}"),
        FakeOp::Summarize => format!("summary of {} characters", input.chars().count()),
    }
}

#[async_trait]
impl AiBackend for FakeBackend {
    async fn transcribe(
        &self,
        audio: &[u8],
        _content_type: &str,
        _filename: &str,
    ) -> Result<String, AiError> {
        let input = String::from_utf8_lossy(audio).into_owned();
        self.answer(FakeOp::Transcribe, input).await
    }

    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        self.answer(FakeOp::Complete, prompt.to_string()).await
    }

    async fn summarize(&self, corpus: &str) -> Result<String, AiError> {
        self.answer(FakeOp::Summarize, corpus.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_are_consumed_in_order() {
        let fake = FakeBackend::new();
        fake.reply(FakeOp::Complete, Err(AiError::Backend("boom".into())))
            .reply(FakeOp::Complete, Ok("second".into()));

        assert!(fake.complete("a").await.is_err());
        assert_eq!(fake.complete("b").await.unwrap(), "second");
        assert_eq!(fake.complete("c").await.unwrap(), "completion: c");
        assert_eq!(fake.call_count(FakeOp::Complete), 3);
    }

    #[tokio::test]
    async fn transcription_echoes_audio_by_default() {
        let fake = FakeBackend::new();
        assert_eq!(fake.transcribe(b"hello", "audio/webm", "a.webm").await.unwrap(), "hello");
        assert_eq!(
            fake.calls(),
            vec![FakeCall {
                op: FakeOp::Transcribe,
                input: "hello".into()
            }]
        );
    }
}
