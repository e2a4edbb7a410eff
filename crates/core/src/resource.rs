//! Resource ledger entries attached to a consultation.
//!
//! A consultation's resources form an append-only sequence. Append order is the
//! canonical order for display and for report aggregation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a consultation's resource ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceEntry {
    /// Speech-to-text output for an uploaded recording.
    Transcript {
        /// When the recording was uploaded (staged), not when transcription finished.
        captured_at: DateTime<Utc>,
        text: String,
    },
    /// A chat-completion question and its answer.
    Qa { question: String, answer: String },
    /// A generated summary of the ledger at the time it ran.
    Report {
        generated_at: DateTime<Utc>,
        text: String,
    },
}

/// Discriminant of a [`ResourceEntry`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Transcript,
    Qa,
    Report,
}

impl ResourceEntry {
    pub fn transcript(captured_at: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self::Transcript {
            captured_at,
            text: text.into(),
        }
    }

    pub fn qa(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self::Qa {
            question: question.into(),
            answer: answer.into(),
        }
    }

    pub fn report(generated_at: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self::Report {
            generated_at,
            text: text.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceEntry::Transcript { .. } => ResourceKind::Transcript,
            ResourceEntry::Qa { .. } => ResourceKind::Qa,
            ResourceEntry::Report { .. } => ResourceKind::Report,
        }
    }

    /// Text of a report entry, `None` for other kinds.
    pub fn report_text(&self) -> Option<&str> {
        match self {
            ResourceEntry::Report { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Fragment contributed to a report corpus.
    ///
    /// Reports contribute nothing: a report is never summarized again.
    pub fn corpus_fragment(&self) -> Option<String> {
        match self {
            ResourceEntry::Transcript { captured_at, text } => Some(format!(
                "Transcription ({}): {}",
                captured_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                text
            )),
            ResourceEntry::Qa { question, answer } => {
                Some(format!("Question: {question}\nAnswer: {answer}"))
            }
            ResourceEntry::Report { .. } => None,
        }
    }
}

/// Concatenate entries (in the given order) into the text handed to the summarizer.
///
/// Each fragment is followed by a blank line. The result is empty when the
/// entries contain nothing but reports.
pub fn build_report_corpus<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = &'a ResourceEntry>,
{
    let mut corpus = String::new();
    for fragment in entries.into_iter().filter_map(ResourceEntry::corpus_fragment) {
        corpus.push_str(&fragment);
        corpus.push_str("\n\n");
    }
    corpus
}
