//! LLM provider trait and an OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;

const PROVIDER: &str = "openai-compatible";

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One message in a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Fully aggregated completion text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: String,
}

/// A text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run a completion and return the whole text, however it was delivered.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

// ── OpenAI-compatible client ────────────────────────────────────────

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    stream: bool,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP client error: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            stream: config.stream,
            timeout: config.timeout,
        })
    }

    fn request_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                provider: PROVIDER.to_string(),
                timeout: self.timeout,
            }
        } else {
            LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn read_streamed(&self, response: reqwest::Response) -> Result<String, LlmError> {
        let mut events = SseAccumulator::default();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.request_error(e))?;
            if events.push(&chunk)? {
                break;
            }
        }
        events.finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "stream": self.stream,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {status}: {}", text.chars().take(300).collect::<String>()),
            });
        }

        let content = if self.stream {
            self.read_streamed(response).await?
        } else {
            let parsed: ChatResponse =
                response.json().await.map_err(|e| LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default()
        };

        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(CompletionResponse { content })
    }
}

// ── Server-sent events ──────────────────────────────────────────────

/// Concatenates `choices[0].delta.content` fragments from an SSE body.
///
/// Bytes may arrive split anywhere, including mid-line and mid-UTF-8
/// sequence, so only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl SseAccumulator {
    /// Feed raw bytes. Returns `true` once `data: [DONE]` has been seen.
    pub fn push(&mut self, bytes: &[u8]) -> Result<bool, LlmError> {
        self.pending.extend_from_slice(bytes);

        while !self.done
            && let Some(pos) = self.pending.iter().position(|b| *b == b'\n')
        {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line))?;
        }
        Ok(self.done)
    }

    /// Flush a trailing unterminated line and return the aggregated text.
    pub fn finish(mut self) -> Result<String, LlmError> {
        if !self.done && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&String::from_utf8_lossy(&line))?;
        }
        Ok(self.text)
    }

    fn handle_line(&mut self, line: &str) -> Result<(), LlmError> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: ChatChunk = serde_json::from_str(data)?;
        if let Some(fragment) = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
        {
            self.text.push_str(&fragment);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn sse_concatenates_fragments() {
        let mut acc = SseAccumulator::default();
        assert!(!acc.push(chunk("Hel").as_bytes()).unwrap());
        assert!(!acc.push(chunk("lo").as_bytes()).unwrap());
        assert!(acc.push(b"data: [DONE]\n\n").unwrap());
        assert_eq!(acc.finish().unwrap(), "Hello");
    }

    #[test]
    fn sse_handles_split_lines() {
        let body = format!("{}{}data: [DONE]\n", chunk("SP"), chunk("AM"));
        let mut acc = SseAccumulator::default();
        for piece in body.as_bytes().chunks(7) {
            if acc.push(piece).unwrap() {
                break;
            }
        }
        assert_eq!(acc.finish().unwrap(), "SPAM");
    }

    #[test]
    fn sse_handles_split_utf8() {
        let body = chunk("Привет");
        let bytes = body.as_bytes();
        // Split inside the first Cyrillic character.
        let cut = body.find('П').unwrap() + 1;
        let mut acc = SseAccumulator::default();
        acc.push(&bytes[..cut]).unwrap();
        acc.push(&bytes[cut..]).unwrap();
        assert_eq!(acc.finish().unwrap(), "Привет");
    }

    #[test]
    fn sse_ignores_role_only_and_comment_lines() {
        let mut acc = SseAccumulator::default();
        acc.push(b": keep-alive\n").unwrap();
        acc.push(b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n")
            .unwrap();
        acc.push(chunk("NORMAL").as_bytes()).unwrap();
        assert_eq!(acc.finish().unwrap(), "NORMAL");
    }

    #[test]
    fn sse_flushes_unterminated_tail() {
        let mut acc = SseAccumulator::default();
        let line = chunk("tail");
        acc.push(line.trim_end().as_bytes()).unwrap();
        assert_eq!(acc.finish().unwrap(), "tail");
    }

    #[test]
    fn sse_rejects_garbage_json() {
        let mut acc = SseAccumulator::default();
        assert!(acc.push(b"data: {oops\n").is_err());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let config = LlmConfig {
            api_key: SecretString::from("sk-test"),
            base_url: "https://llm.example.com/v1/".into(),
            model: "test-model".into(),
            stream: false,
            timeout: Duration::from_secs(5),
        };
        let provider = OpenAiCompatProvider::new(&config).unwrap();
        assert_eq!(provider.endpoint, "https://llm.example.com/v1/chat/completions");
        assert_eq!(provider.model_name(), "test-model");
    }

    #[test]
    fn chat_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::system("x")).unwrap();
        assert_eq!(json["role"], "system");
        let json = serde_json::to_value(ChatMessage::user("y")).unwrap();
        assert_eq!(json["role"], "user");
    }
}
