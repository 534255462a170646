use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::security::redact;

// ── Chat completion API types ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens: 500,
            temperature: 0.7,
            top_p: 0.95,
            stream: false,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Total characters across all messages, for logging prompt size.
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API credentials are missing")]
    MissingCredentials,
    #[error("LLM API request timed out after {0} seconds")]
    Timeout(u64),
    #[error("LLM API returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("LLM API request failed: {0}")]
    Transport(String),
    #[error("LLM API response could not be decoded: {0}")]
    Decode(String),
    #[error("unexpected response format from LLM API")]
    UnexpectedFormat,
}

/// Anything that can answer a chat completion. The HTTP client implements it
/// for production; tests script it.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Whether an API key and endpoint are configured.
    fn has_credentials(&self) -> bool;

    /// Non-streaming completion: the first choice's message content.
    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<String, LlmError>;

    /// Streaming completion. Each text increment is handed to `sink` in
    /// arrival order; the concatenation is returned when the stream ends.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
        sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, LlmError>;

    /// Cheap round trip to verify credentials and endpoint.
    async fn health_check(&self, timeout: Duration) -> Result<(), LlmError> {
        let request = CompletionRequest::new("You are a helpful assistant.", "Hello, are you working?")
            .max_tokens(50)
            .temperature(0.7);
        self.complete(&request, timeout).await.map(|_| ())
    }
}

// ── Streaming frames ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

/// Incremental decoder for `data: {...}` server-sent event lines. Lines may be
/// split across network chunks; frames that are not completion deltas are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the events of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = Self::parse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line left without a newline when the connection closed.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }

    fn parse_line(line: &str) -> Option<SseEvent> {
        let payload = line.trim().strip_prefix("data:")?.trim();
        if payload == "[DONE]" {
            return Some(SseEvent::Done);
        }
        let frame: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("Skipping malformed stream frame: {}", e);
                return None;
            }
        };
        let content = frame["choices"][0]["delta"]["content"].as_str()?;
        if content.is_empty() {
            return None;
        }
        Some(SseEvent::Delta(content.to_string()))
    }
}

/// Pull `choices[0].message.content` out of a completion response.
pub fn extract_content(response: &serde_json::Value) -> Option<String> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
}

// ── Client ───────────────────────────────────────────────────────────

/// Azure OpenAI chat-completions client. `endpoint` is the full deployment URL
/// including the `api-version` query.
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl AzureOpenAiClient {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder().build().unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    fn map_error(e: reqwest::Error, timeout: Duration) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(timeout.as_secs())
        } else {
            LlmError::Transport(e.to_string())
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<reqwest::Response, LlmError> {
        if !self.has_credentials() {
            return Err(LlmError::MissingCredentials);
        }

        log::info!(
            "Sending completion request to {} ({} prompt chars, stream={})",
            redact(&self.endpoint, 24),
            request.prompt_chars(),
            request.stream
        );

        let resp = self
            .http
            .post(&self.endpoint)
            .header("api-key", &self.api_key)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Http { status, body });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionBackend for AzureOpenAiClient {
    fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.endpoint.trim().is_empty()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let mut request = request.clone();
        request.stream = false;

        let resp = self.send(&request, timeout).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;
        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))?;

        match extract_content(&parsed) {
            Some(content) => Ok(content),
            None => {
                log::error!("Unexpected completion response: {}", text);
                Err(LlmError::UnexpectedFormat)
            }
        }
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
        sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, LlmError> {
        let mut request = request.clone();
        request.stream = true;

        let resp = self.send(&request, timeout).await?;

        let mut full_response = String::new();
        let mut decoder = SseDecoder::new();
        let mut stream = resp.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| Self::map_error(e, timeout))?;
            for event in decoder.push(&chunk) {
                match event {
                    SseEvent::Delta(text) => {
                        full_response.push_str(&text);
                        sink(&text);
                    }
                    SseEvent::Done => return Ok(full_response),
                }
            }
        }

        // Connection closed without a [DONE] sentinel
        for event in decoder.finish() {
            if let SseEvent::Delta(text) = event {
                full_response.push_str(&text);
                sink(&text);
            }
        }
        Ok(full_response)
    }
}
