//! Upstream completion provider.
//!
//! [`CompletionProvider`] is the seam the relay streams from; [`OpenAiProvider`]
//! talks to an OpenAI-compatible `/chat/completions` endpoint over `reqwest`.

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::{ChatChunk, ChatRequest};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Parse error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Stream(String),
}

/// Lazy, single-pass sequence of upstream chunks in the order produced.
pub type ChunkStream = BoxStream<'static, Result<ChatChunk, UpstreamError>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Opens a streaming completion. Failures before the first chunk come
    /// back as `Err`, later ones as an `Err` item inside the stream.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, UpstreamError>;
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, UpstreamError> {
        let url = self.completions_url();
        debug!(url = %url, model = %request.model, "Opening upstream stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: error_message(status.as_u16(), &body),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(UpstreamError::from));
        Ok(decode_sse(bytes).boxed())
    }
}

// Status first, then the provider's own message when the body has one
fn error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<Value>(body).ok().as_ref().and_then(provider_error) {
        Some(message) => format!("{status} {message}"),
        None => format!("{status} status code"),
    }
}

fn provider_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}

/// Turns raw SSE bytes into parsed chunks, stopping at `data: [DONE]`.
pub fn decode_sse<S>(bytes: S) -> impl futures::Stream<Item = Result<ChatChunk, UpstreamError>> + Send
where
    S: futures::Stream<Item = Result<Vec<u8>, UpstreamError>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut events = Box::pin(bytes.eventsource());
        while let Some(event) = events.next().await {
            let event = event.map_err(stream_error)?;
            if event.data == "[DONE]" {
                break;
            }
            if event.data.is_empty() {
                continue;
            }
            yield parse_chunk(&event.data)?;
        }
    }
}

fn stream_error(err: EventStreamError<UpstreamError>) -> UpstreamError {
    match err {
        EventStreamError::Transport(err) => err,
        other => UpstreamError::Stream(other.to_string()),
    }
}

fn parse_chunk(data: &str) -> Result<ChatChunk, UpstreamError> {
    let value: Value = serde_json::from_str(data)?;
    if let Some(message) = provider_error(&value) {
        return Err(UpstreamError::Stream(message));
    }
    Ok(serde_json::from_value(value)?)
}
