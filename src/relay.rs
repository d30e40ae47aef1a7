//! Streaming relay: forwards upstream text fragments as SSE messages.

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, error};

use crate::config::{MAX_COMPLETION_TOKENS, SYSTEM_PROMPT, TEMPERATURE};
use crate::metrics::{FRAGMENTS_RELAYED, UPSTREAM_ERRORS};
use crate::models::{ChatMessage, ChatRequest};
use crate::upstream::CompletionProvider;

/// One outbound message. A session ends with exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Content(String),
    Done,
    Error(String),
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Content(_))
    }

    /// Payload of the `data:` field.
    pub fn data(&self) -> String {
        match self {
            RelayEvent::Content(content) => json!({ "content": content }).to_string(),
            RelayEvent::Done => "[DONE]".to_string(),
            RelayEvent::Error(message) => json!({ "error": message }).to_string(),
        }
    }

    pub fn into_sse(self) -> Event {
        Event::default().data(self.data())
    }
}

pub fn build_request(model: &str, prompt: String) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
        max_completion_tokens: MAX_COMPLETION_TOKENS,
        temperature: TEMPERATURE,
        stream: true,
    }
}

/// Runs one upstream call and yields its fragments in order, then the
/// terminal event. Dropping the stream drops the upstream response with it.
pub fn relay(
    provider: Arc<dyn CompletionProvider>,
    request: ChatRequest,
) -> impl Stream<Item = RelayEvent> + Send + 'static {
    stream! {
        let mut chunks = match provider.stream_chat(request).await {
            Ok(chunks) => chunks,
            Err(err) => {
                UPSTREAM_ERRORS.inc();
                error!(error = %err, "Upstream request failed");
                yield RelayEvent::Error(err.to_string());
                return;
            }
        };

        let mut sent = 0usize;
        while let Some(next) = chunks.next().await {
            match next {
                Ok(chunk) => {
                    if let Some(text) = chunk.content() {
                        sent += 1;
                        FRAGMENTS_RELAYED.inc();
                        yield RelayEvent::Content(text.to_string());
                    }
                }
                Err(err) => {
                    UPSTREAM_ERRORS.inc();
                    error!(error = %err, fragments = sent, "Upstream stream failed");
                    yield RelayEvent::Error(err.to_string());
                    return;
                }
            }
        }

        debug!(fragments = sent, "Upstream stream finished");
        yield RelayEvent::Done;
    }
}

pub fn sse_events(
    events: impl Stream<Item = RelayEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events.map(|event| Ok(event.into_sse()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatChunk;
    use crate::upstream::{ChunkStream, UpstreamError};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    // Replays a fixed script, or fails before streaming when `open_error` is set
    struct Scripted {
        items: Mutex<Option<Vec<Result<ChatChunk, UpstreamError>>>>,
        open_error: Option<String>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(items: Vec<Result<ChatChunk, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                items: Mutex::new(Some(items)),
                open_error: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                items: Mutex::new(None),
                open_error: Some(message.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, UpstreamError> {
            self.seen.lock().unwrap().push(request);
            if let Some(message) = &self.open_error {
                return Err(UpstreamError::Stream(message.clone()));
            }
            let items = self.items.lock().unwrap().take().unwrap_or_default();
            Ok(stream::iter(items).boxed())
        }
    }

    async fn run(provider: Arc<Scripted>) -> Vec<RelayEvent> {
        relay(provider, build_request("gpt-5.1", "hi".into()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn fragments_then_done() {
        let provider = Scripted::new(vec![Ok(ChatChunk::text("Hel")), Ok(ChatChunk::text("lo"))]);
        let events = run(provider).await;
        assert_eq!(
            events,
            vec![
                RelayEvent::Content("Hel".into()),
                RelayEvent::Content("lo".into()),
                RelayEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_sent_fragments() {
        let provider = Scripted::new(vec![
            Ok(ChatChunk::text("Hi")),
            Err(UpstreamError::Stream("boom".into())),
            Ok(ChatChunk::text("never")),
        ]);
        let events = run(provider).await;
        assert_eq!(
            events,
            vec![RelayEvent::Content("Hi".into()), RelayEvent::Error("boom".into())]
        );
    }

    #[tokio::test]
    async fn failure_before_first_fragment() {
        let events = run(Scripted::failing("401 status code")).await;
        assert_eq!(events, vec![RelayEvent::Error("401 status code".into())]);
    }

    #[tokio::test]
    async fn chunks_without_text_are_skipped_in_order() {
        let provider = Scripted::new(vec![
            Ok(ChatChunk::default()),
            Ok(ChatChunk::text("a")),
            Ok(ChatChunk::text("")),
            Ok(ChatChunk::default()),
            Ok(ChatChunk::text("b")),
        ]);
        let events = run(provider).await;
        assert_eq!(
            events,
            vec![
                RelayEvent::Content("a".into()),
                RelayEvent::Content("b".into()),
                RelayEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn exactly_one_terminal_event() {
        let provider = Scripted::new(vec![]);
        let events = run(provider).await;
        assert_eq!(events, vec![RelayEvent::Done]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn request_carries_persona_and_fixed_sampling() {
        let provider = Scripted::new(vec![]);
        let _ = relay(provider.clone(), build_request("gpt-5.1", "What is 2+2?".into()))
            .collect::<Vec<_>>()
            .await;

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let request = &seen[0];
        assert_eq!(request.messages[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(request.messages[1], ChatMessage::user("What is 2+2?"));
        assert_eq!(request.max_completion_tokens, 2048);
        assert_eq!(request.temperature, 0.0);
        assert!(request.stream);
    }

    // Sets the flag once the upstream stream holding it is dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    // Yields one fragment, then never finishes
    struct Endless {
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CompletionProvider for Endless {
        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChunkStream, UpstreamError> {
            let flag = DropFlag(Arc::clone(&self.released));
            let chunks = stream::iter(vec![Ok::<_, UpstreamError>(ChatChunk::text("first"))])
                .chain(stream::pending())
                .map(move |chunk| {
                    let _held = &flag;
                    chunk
                });
            Ok(chunks.boxed())
        }
    }

    #[tokio::test]
    async fn dropping_relay_releases_upstream() {
        let released = Arc::new(AtomicBool::new(false));
        let provider = Arc::new(Endless {
            released: Arc::clone(&released),
        });

        let mut events = Box::pin(relay(provider, build_request("gpt-5.1", "hi".into())));
        assert_eq!(events.next().await, Some(RelayEvent::Content("first".into())));
        assert!(!released.load(Ordering::SeqCst));

        drop(events);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn event_payloads() {
        assert_eq!(RelayEvent::Content("Hel".into()).data(), r#"{"content":"Hel"}"#);
        assert_eq!(RelayEvent::Done.data(), "[DONE]");
        assert_eq!(RelayEvent::Error("boom".into()).data(), r#"{"error":"boom"}"#);
        assert_eq!(
            RelayEvent::Content("line\nbreak \"q\"".into()).data(),
            r#"{"content":"line\nbreak \"q\""}"#
        );
    }
}
