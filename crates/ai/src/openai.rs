//! OpenAI HTTP backend.
//!
//! Transcription goes to `/audio/transcriptions`; completion and report
//! summaries go to `/responses`. No retry happens here: wrap the backend in a
//! [`crate::RetryingBackend`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::backend::AiBackend;
use crate::error::AiError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TRANSCRIBE_MODEL: &str = "whisper-1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4-turbo";
pub const DEFAULT_REPORT_LANGUAGE: &str = "Spanish";

const CHAT_INSTRUCTIONS: &str = "Complete the text as an expert writer.";
const USER_AGENT: &str = concat!("medscribe/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub transcribe_model: String,
    pub chat_model: String,
    pub report_language: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            transcribe_model: DEFAULT_TRANSCRIBE_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            report_language: DEFAULT_REPORT_LANGUAGE.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct OpenAiBackend {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    /// An empty API key is accepted; every call then fails with a backend error.
    pub fn new(config: OpenAiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Backend(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    fn api_key(&self) -> Result<&str, AiError> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            return Err(AiError::Backend("missing api key".into()));
        }
        Ok(key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn respond(&self, instructions: &str, input: &str) -> Result<String, AiError> {
        let key = self.api_key()?;
        let body = ResponsesRequest {
            model: &self.config.chat_model,
            instructions,
            input,
        };
        let response = self
            .http
            .post(self.endpoint("responses"))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let payload: Value = read_json(response).await?;
        extract_output_text(&payload)
            .ok_or_else(|| AiError::Backend("response carried no output text".into()))
    }
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl AiBackend for OpenAiBackend {
    #[instrument(skip(self, audio, filename), fields(bytes = audio.len()))]
    async fn transcribe(
        &self,
        audio: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, AiError> {
        if audio.is_empty() {
            return Err(AiError::InvalidInput("audio payload is empty".into()));
        }
        let key = self.api_key()?;
        let part = Part::bytes(audio.to_vec())
            .file_name(upload_file_name(content_type, filename))
            .mime_str(content_type)
            .map_err(|e| AiError::InvalidInput(format!("content type: {e}")))?;
        let form = Form::new()
            .text("model", self.config.transcribe_model.clone())
            .part("file", part);

        let response = self
            .http
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: TranscriptionResponse = read_json(response).await?;
        debug!(chars = parsed.text.len(), "transcription received");
        Ok(parsed.text)
    }

    #[instrument(skip_all)]
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        self.respond(CHAT_INSTRUCTIONS, prompt).await
    }

    #[instrument(skip_all)]
    async fn summarize(&self, corpus: &str) -> Result<String, AiError> {
        let language = &self.config.report_language;
        self.respond(&report_instructions(language), &report_prompt(language, corpus))
            .await
    }
}

fn report_instructions(language: &str) -> String {
    format!(
        "You are a medical professional assistant. Create a comprehensive summary in {language} \
         of the provided medical consultation information. Focus on key findings, patient \
         symptoms, and important details."
    )
}

fn report_prompt(language: &str, corpus: &str) -> String {
    format!(
        "Summarize the given information. Write the summary in {language}. Use the information \
         to create a report.\n\nInformation:\n{corpus}"
    )
}

/// File name sent with the multipart upload; the provider sniffs format from it.
/// Name the provider sees for an upload. A recognised audio content type
/// decides the extension; otherwise the uploaded filename's extension is kept,
/// and `webm` is the last resort.
fn upload_file_name(content_type: &str, filename: &str) -> String {
    let subtype = content_type
        .split(';')
        .next()
        .and_then(|essence| essence.trim().strip_prefix("audio/"))
        .unwrap_or("");
    let extension = match subtype {
        "mpeg" | "mp3" => "mp3".to_string(),
        "mp4" | "m4a" | "x-m4a" => "m4a".to_string(),
        "wav" | "x-wav" | "wave" => "wav".to_string(),
        "ogg" => "ogg".to_string(),
        "flac" => "flac".to_string(),
        "webm" => "webm".to_string(),
        _ => filename_extension(filename).unwrap_or_else(|| "webm".to_string()),
    };
    format!("audio.{extension}")
}

fn filename_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    let usable = !stem.is_empty()
        && !ext.is_empty()
        && ext.len() <= 5
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    usable.then(|| ext.to_ascii_lowercase())
}

fn transport_error(e: reqwest::Error) -> AiError {
    AiError::Backend(format!("transport: {e}"))
}

fn classify_status(status: StatusCode, body: &str) -> AiError {
    let detail = format!("{}: {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        AiError::RateLimited(detail)
    } else {
        AiError::Backend(detail)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AiError::Backend(format!("malformed response: {e}")))
}

/// Concatenate every `output_text` fragment of a Responses API payload.
fn extract_output_text(payload: &Value) -> Option<String> {
    if let Some(text) = payload.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let fragments: Vec<&str> = payload
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if fragments.is_empty() {
        None
    } else {
        Some(fragments.concat())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_429_is_rate_limited() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_rate_limited());
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, " bad "),
            AiError::Backend("400: bad".into())
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            AiError::Backend(_)
        ));
    }

    #[test]
    fn output_text_is_collected_from_message_parts() {
        let payload = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hola, "},
                    {"type": "output_text", "text": "mundo"}
                ]}
            ]
        });
        assert_eq!(extract_output_text(&payload).as_deref(), Some("Hola, mundo"));
    }

    #[test]
    fn missing_output_text_is_none() {
        assert_eq!(extract_output_text(&json!({"output": []})), None);
        assert_eq!(extract_output_text(&json!({})), None);
    }

    #[test]
    fn upload_names_follow_content_type() {
        assert_eq!(upload_file_name("audio/mpeg", "visit.ogg"), "audio.mp3");
        assert_eq!(upload_file_name("audio/wav; rate=16000", "x"), "audio.wav");
        assert_eq!(upload_file_name("application/octet-stream", "recording"), "audio.webm");
    }

    #[test]
    fn generic_content_types_keep_the_uploaded_extension() {
        assert_eq!(upload_file_name("application/octet-stream", "visit.MP3"), "audio.mp3");
        assert_eq!(upload_file_name("", "dictado.m4a"), "audio.m4a");
        assert_eq!(upload_file_name("audio/x-unknown", "nota.flac"), "audio.flac");
        assert_eq!(upload_file_name("application/octet-stream", ".hidden"), "audio.webm");
        assert_eq!(upload_file_name("application/octet-stream", "a.tar/gz"), "audio.webm");
    }

    #[test]
    fn report_prompt_embeds_corpus_and_language() {
        let prompt = report_prompt("Spanish", "Question: q\nAnswer: a\n\n");
        assert!(prompt.starts_with("Summarize the given information. Write the summary in Spanish."));
        assert!(prompt.ends_with("Information:\nQuestion: q\nAnswer: a\n\n"));
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let backend = OpenAiBackend::new(OpenAiConfig::new("")).unwrap();
        let err = backend.complete("hello").await.unwrap_err();
        assert_eq!(err, AiError::Backend("missing api key".into()));
    }
}
