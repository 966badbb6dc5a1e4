//! Google Gemini provider
//!
//! Uses the `generateContent` REST API directly:
//! - chat turns go through `streamGenerateContent?alt=sse` and are turned into
//!   cumulative snapshots
//! - quizzes go through `generateContent` with a JSON response schema
//!
//! # Configuration
//!
//! ```text
//! GEMINI_API_KEY=...
//! GEMINI_BASE_URL=https://generativelanguage.googleapis.com/v1beta
//! CHAT_MODEL=gemini-3-pro-preview
//! QUIZ_MODEL=gemini-3-flash-preview
//! ```

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::prompts_builtin;
use crate::conversation::{Message, Sender};

use super::{AiGateway, ProviderError, SnapshotStream};

/// Content block in a Gemini request or response
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    /// Set on reasoning summaries, which are never shown to the student
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
                thought: None,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    /// Visible text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought.unwrap_or(false))
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Gemini provider configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Base URL for the API
    pub base_url: String,
    /// API key; calls fail with `NotConfigured` when absent
    pub api_key: Option<String>,
    /// Model used for the streaming tutor chat
    pub chat_model: String,
    /// Model used for quiz generation
    pub quiz_model: String,
    /// Sampling temperature for chat turns
    pub temperature: f32,
    /// Connect timeout, whole-request timeout for quizzes, and the longest
    /// silence tolerated between chunks of a chat stream, in seconds
    pub timeout_secs: u64,
    /// Persona sent with every chat turn
    pub system_instruction: String,
    /// Questions requested per quiz
    pub quiz_question_count: usize,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            chat_model: "gemini-3-pro-preview".to_string(),
            quiz_model: "gemini-3-flash-preview".to_string(),
            temperature: 0.7,
            timeout_secs: 120,
            system_instruction: prompts_builtin::TEACHER.to_string(),
            quiz_question_count: 3,
        }
    }
}

impl GeminiConfig {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()?;

        Ok(Self { config, client })
    }

    fn post(&self, model: &str, method: &str) -> Result<RequestBuilder, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("GEMINI_API_KEY is not set".into()))?;

        Ok(self
            .client
            .post(format!("{}/models/{}:{}", self.config.base_url, model, method))
            .header("x-goog-api-key", api_key))
    }

    fn chat_request(&self, history: &[Message], text: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: build_contents(history, text),
            system_instruction: Some(Content::text(None, &self.config.system_instruction)),
            generation_config: GenerationConfig {
                temperature: Some(self.config.temperature),
                ..Default::default()
            },
        }
    }

    fn quiz_request(&self, topic: &str) -> GenerateContentRequest {
        let prompt = prompts_builtin::quiz_prompt(topic, self.config.quiz_question_count);
        GenerateContentRequest {
            contents: vec![Content::text(Some("user"), &prompt)],
            system_instruction: None,
            generation_config: GenerationConfig {
                temperature: None,
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(quiz_schema()),
            },
        }
    }

    async fn request_quiz(&self, topic: &str) -> Result<String, ProviderError> {
        let request = self.quiz_request(topic);
        let response = self
            .post(&self.config.quiz_model, "generateContent")?
            .timeout(self.config.timeout())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let completion: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {} - Body: {}", e, body))
        })?;

        Ok(completion.text())
    }
}

#[async_trait]
impl AiGateway for GeminiProvider {
    async fn stream_chat(
        &self,
        history: &[Message],
        text: &str,
    ) -> Result<SnapshotStream, ProviderError> {
        let request = self.chat_request(history, text);

        tracing::debug!(
            model = %self.config.chat_model,
            turns = request.contents.len(),
            "Opening chat stream"
        );

        let idle = self.config.timeout();
        let send = self
            .post(&self.config.chat_model, "streamGenerateContent")?
            .query(&[("alt", "sse")])
            .json(&request)
            .send();
        let response = tokio::time::timeout(idle, send)
            .await
            .map_err(|_| ProviderError::Timeout(format!("no response after {:?}", idle)))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        Ok(snapshots(response.bytes_stream(), idle).boxed())
    }

    async fn generate_quiz(&self, topic: &str) -> String {
        match self.request_quiz(topic).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => "[]".to_string(),
            Err(e) => {
                tracing::error!(error = %e, topic, "Quiz generation failed");
                "[]".to_string()
            }
        }
    }
}

/// Conversation turns for the model.
///
/// Streaming or empty messages are skipped, and so are AI turns before the
/// first user turn (the welcome greeting), since a conversation must open
/// with the user.
fn build_contents(history: &[Message], text: &str) -> Vec<Content> {
    history
        .iter()
        .filter(|m| !m.is_streaming && !m.text.trim().is_empty())
        .skip_while(|m| m.sender == Sender::Ai)
        .map(|m| {
            let role = match m.sender {
                Sender::User => "user",
                Sender::Ai => "model",
            };
            Content::text(Some(role), &m.text)
        })
        .chain(std::iter::once(Content::text(Some("user"), text)))
        .collect()
}

fn quiz_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "question": { "type": "STRING" },
                "options": { "type": "ARRAY", "items": { "type": "STRING" } },
                "correctAnswer": { "type": "STRING" },
                "explanation": { "type": "STRING" }
            },
            "required": ["question", "options", "correctAnswer", "explanation"]
        }
    })
}

fn api_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(body) {
        return ProviderError::InvalidResponse(format!(
            "API error ({}): {}",
            error_resp.error.status.as_deref().unwrap_or("UNKNOWN"),
            error_resp.error.message
        ));
    }
    ProviderError::InvalidResponse(format!("HTTP {}: {}", status, body))
}

/// Splits a Server-Sent Events byte stream into `data:` payloads
///
/// Bytes are buffered until a full line arrives, so a UTF-8 sequence cut
/// across two network chunks is decoded intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every event completed by them
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            self.line(line.trim_end_matches('\r'), &mut events);
        }
        events
    }

    /// Flush whatever is left once the body ends
    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        let raw = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&raw);
        let rest = rest.trim_end_matches('\r');
        if !rest.is_empty() {
            self.line(rest, &mut events);
        }
        if !self.data.is_empty() {
            events.push(self.data.drain(..).collect::<Vec<_>>().join("\n"));
        }
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.drain(..).collect::<Vec<_>>().join("\n"));
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
    }
}

/// Turn a raw SSE body into cumulative text snapshots
///
/// The stream ends after the first error, whether it comes from the
/// transport, an error payload inside the body, or `idle` passing with no
/// bytes received. A long answer that keeps streaming is never cut off.
fn snapshots<S, B, E>(body: S, idle: Duration) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();
        let mut full = String::new();

        loop {
            let next = match tokio::time::timeout(idle, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    yield Err(ProviderError::Timeout(format!("stream idle for {:?}", idle)));
                    return;
                }
            };
            let (payloads, done) = match next {
                Some(Ok(bytes)) => (decoder.feed(bytes.as_ref()), false),
                Some(Err(e)) => {
                    let err: ProviderError = e.into();
                    yield Err(err);
                    return;
                }
                None => (decoder.finish(), true),
            };

            for payload in payloads {
                match decode_delta(&payload) {
                    Ok(Some(delta)) => {
                        full.push_str(&delta);
                        yield Ok(full.clone());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if done {
                break;
            }
        }
    }
}

fn decode_delta(payload: &str) -> Result<Option<String>, ProviderError> {
    let parsed: GenerateContentResponse = serde_json::from_str(payload).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse stream chunk: {} - {}", e, payload))
    })?;

    if let Some(error) = parsed.error {
        return Err(ProviderError::InvalidResponse(format!(
            "API error: {}",
            error.message
        )));
    }

    let text = parsed.text();
    Ok(if text.is_empty() { None } else { Some(text) })
}
