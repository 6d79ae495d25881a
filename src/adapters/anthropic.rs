//! Anthropic Messages API client.
//!
//! Structured output is requested by forcing a single tool whose
//! `input_schema` is the caller's schema; the tool input becomes the
//! response content. Streaming uses server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ReasoningClient, ReasoningError, ReasoningRequest, ReasoningResponse, StreamEvent};
use crate::domain::Usage;

const API_VERSION: &str = "2023-06-01";

/// Connection settings for the Anthropic API
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Reasoning client backed by the Anthropic Messages API
pub struct AnthropicClient {
    config: AnthropicConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { input: serde_json::Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl AnthropicClient {
    /// Create a client; fails if the API key is missing
    pub fn new(config: AnthropicConfig) -> Result<Self, ReasoningError> {
        if config.api_key.is_empty() {
            return Err(ReasoningError::Authentication(
                "Anthropic API key is required (set ANTHROPIC_API_KEY)".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ReasoningError::Request(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, request: &ReasoningRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": request.system_prompt,
            "messages": [{ "role": "user", "content": request.user_message }],
        });

        if let Some(schema) = &request.schema {
            body["tools"] = json!([{
                "name": schema.name,
                "description": "Return the structured result.",
                "input_schema": schema.schema,
            }]);
            body["tool_choice"] = json!({ "type": "tool", "name": schema.name });
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    async fn send(
        &self,
        request: &ReasoningRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ReasoningError> {
        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(request, stream))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasoningError::Timeout(self.config.request_timeout.as_millis() as u64)
                } else {
                    ReasoningError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);

        Err(classify_status(status, message))
    }
}

/// Map an HTTP failure status onto the reasoning error taxonomy
fn classify_status(status: StatusCode, message: String) -> ReasoningError {
    match status.as_u16() {
        401 | 403 => ReasoningError::Authentication(message),
        429 => ReasoningError::RateLimited(message),
        503 | 529 => ReasoningError::Overloaded(message),
        code => ReasoningError::Request(format!("HTTP {}: {}", code, message)),
    }
}

/// Pull the text (or tool input) out of a non-streaming response
fn extract_content(response: MessagesResponse) -> Result<ReasoningResponse, ReasoningError> {
    let usage = Usage::new(response.usage.input_tokens, response.usage.output_tokens);
    let mut text = String::new();

    for block in response.content {
        match block {
            ContentBlock::ToolUse { input } => {
                return Ok(ReasoningResponse {
                    content: input.to_string(),
                    usage,
                });
            }
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::Other => {}
        }
    }

    if text.is_empty() {
        return Err(ReasoningError::InvalidResponse(
            "response contained no text or tool output".to_string(),
        ));
    }

    Ok(ReasoningResponse {
        content: text,
        usage,
    })
}

/// Accumulates state while reading a server-sent event stream
#[derive(Debug, Default)]
struct SseState {
    content: String,
    usage: Usage,
}

impl SseState {
    /// Apply one `data:` payload; returns text to forward as a chunk, if any
    fn apply(&mut self, data: &str) -> Result<Option<String>, ReasoningError> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| ReasoningError::InvalidResponse(format!("bad SSE payload: {}", e)))?;

        match value["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let usage = &value["message"]["usage"];
                self.usage.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                self.usage.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
                Ok(None)
            }
            "content_block_delta" => {
                let delta = &value["delta"];
                let piece = match delta["type"].as_str() {
                    Some("text_delta") => delta["text"].as_str(),
                    Some("input_json_delta") => delta["partial_json"].as_str(),
                    _ => None,
                };
                Ok(piece.map(|p| {
                    self.content.push_str(p);
                    p.to_string()
                }))
            }
            "message_delta" => {
                if let Some(out) = value["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = out;
                }
                Ok(None)
            }
            "error" => {
                let message = value["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                match value["error"]["type"].as_str() {
                    Some("overloaded_error") => Err(ReasoningError::Overloaded(message)),
                    Some("rate_limit_error") => Err(ReasoningError::RateLimited(message)),
                    _ => Err(ReasoningError::Request(message)),
                }
            }
            _ => Ok(None),
        }
    }

    fn finish(self) -> ReasoningResponse {
        ReasoningResponse {
            content: self.content,
            usage: self.usage,
        }
    }
}

/// Byte buffer that yields complete lines only, so a multi-byte character
/// split across network chunks is decoded whole
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn call(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        debug!(model = %self.config.model, "Sending reasoning request");

        let response = self.send(&request, false).await?;
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::InvalidResponse(e.to_string()))?;

        extract_content(parsed)
    }

    async fn call_streaming(
        &self,
        request: ReasoningRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ReasoningError> {
        let response = self.send(&request, true).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::default();
            let mut state = SseState::default();

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Failed(ReasoningError::Request(e.to_string())))
                            .await;
                        return;
                    }
                };
                lines.extend(&chunk);

                while let Some(line) = lines.next_line() {
                    let Some(data) = line.trim_end().strip_prefix("data:") else {
                        continue;
                    };

                    match state.apply(data.trim()) {
                        Ok(Some(text)) => {
                            // Receiver gone means nobody is listening any more
                            if tx.send(StreamEvent::Chunk(text)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Reasoning stream reported an error");
                            let _ = tx.send(StreamEvent::Failed(e)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx.send(StreamEvent::Done(state.finish())).await;
        });

        Ok(rx)
    }
}
