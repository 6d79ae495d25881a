//! Adapter interfaces for external systems.
//!
//! The pipeline consumes three collaborators through these traits:
//! - [`ReasoningClient`]: the external reasoning service (LLM)
//! - [`ReferenceDataProvider`]: market data prefetched once per run
//! - [`HistoryProvider`]: optional lookup of past recommendations

pub mod anthropic;
pub mod history;
pub mod reference;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{DataCategory, HistoryRecord, ReferenceBundle, Usage};

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use history::StaticHistory;
pub use reference::{EmptyReferenceData, StaticReferenceData};

/// JSON schema the response content must conform to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Schema name (used as the tool name for providers that need one)
    pub name: String,
    pub schema: serde_json::Value,
}

/// A single request to the reasoning service
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub schema: Option<OutputSchema>,
}

impl ReasoningRequest {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.schema = Some(OutputSchema {
            name: name.into(),
            schema,
        });
        self
    }
}

/// Output of a reasoning call
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningResponse {
    /// Text content, or the JSON document when a schema was requested
    pub content: String,
    pub usage: Usage,
}

/// Failures surfaced by the reasoning service
#[derive(Debug, Clone, Error)]
pub enum ReasoningError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Service overloaded: {0}")]
    Overloaded(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Items pushed on a streaming call's channel.
///
/// Exactly one terminal item (`Done` or `Failed`) ends every stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(String),
    Done(ReasoningResponse),
    Failed(ReasoningError),
}

/// Client for the external reasoning service
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Human-readable client name
    fn name(&self) -> &str;

    /// Issue one call and wait for the full response
    async fn call(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError>;

    /// Issue one call and receive partial output as it arrives.
    ///
    /// The default implementation performs a regular call and pushes the
    /// whole content as a single chunk.
    async fn call_streaming(
        &self,
        request: ReasoningRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ReasoningError> {
        let (tx, rx) = mpsc::channel(4);
        match self.call(request).await {
            Ok(response) => {
                let _ = tx.send(StreamEvent::Chunk(response.content.clone())).await;
                let _ = tx.send(StreamEvent::Done(response)).await;
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Failed(e)).await;
            }
        }
        Ok(rx)
    }
}

/// Drain a stream into a full response, forwarding every chunk to `on_chunk`
pub async fn collect_stream(
    mut rx: mpsc::Receiver<StreamEvent>,
    mut on_chunk: impl FnMut(&str),
) -> Result<ReasoningResponse, ReasoningError> {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Chunk(text) => on_chunk(&text),
            StreamEvent::Done(response) => return Ok(response),
            StreamEvent::Failed(e) => return Err(e),
        }
    }

    Err(ReasoningError::InvalidResponse(
        "stream closed without a terminal event".to_string(),
    ))
}

/// Source of reference data, called once per run before any phase executes
#[async_trait]
pub trait ReferenceDataProvider: Send + Sync {
    async fn fetch_bundle(
        &self,
        categories: &[DataCategory],
        subjects: &[String],
    ) -> Result<ReferenceBundle>;
}

/// Lookup of past recommendations for tasks that want historical context
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn history(&self, subjects: &[String]) -> Result<Vec<HistoryRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ReasoningClient for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(
            &self,
            request: ReasoningRequest,
        ) -> Result<ReasoningResponse, ReasoningError> {
            Ok(ReasoningResponse {
                content: request.user_message,
                usage: Usage::new(3, 2),
            })
        }
    }

    #[tokio::test]
    async fn test_default_streaming_wraps_call() {
        let rx = Echo
            .call_streaming(ReasoningRequest::new("sys", "hello"))
            .await
            .unwrap();

        let mut chunks = Vec::new();
        let response = collect_stream(rx, |c| chunks.push(c.to_string()))
            .await
            .unwrap();

        assert_eq!(chunks, vec!["hello".to_string()]);
        assert_eq!(response.usage.total(), 5);
    }

    #[tokio::test]
    async fn test_collect_stream_without_terminal_event() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(StreamEvent::Chunk("partial".to_string()))
            .await
            .unwrap();
        drop(tx);

        let result = collect_stream(rx, |_| {}).await;
        assert!(matches!(result, Err(ReasoningError::InvalidResponse(_))));
    }
}
