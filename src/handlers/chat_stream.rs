use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, sse::Sse},
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::metrics::{ACTIVE_STREAMS, STREAM_DURATION};
use crate::models::ChatStreamRequest;
use crate::relay::{RelayEvent, build_request, relay, sse_events};
use crate::state::AppState;

// Bookkeeping for one open stream, released when the response body is dropped
struct StreamSession {
    started: Instant,
    finished: bool,
}

impl StreamSession {
    fn open() -> Self {
        ACTIVE_STREAMS.inc();
        Self {
            started: Instant::now(),
            finished: false,
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        ACTIVE_STREAMS.dec();
        STREAM_DURATION.observe(self.started.elapsed().as_secs_f64());
        if !self.finished {
            debug!("Client went away before the stream finished");
        }
    }
}

// Body is parsed leniently, anything without a string prompt relays ""
pub async fn chat_stream_handler(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let payload: ChatStreamRequest = serde_json::from_slice(&body).unwrap_or_default();
    info!(prompt_len = payload.prompt.len(), "Chat stream opened");

    let request = build_request(&state.model, payload.prompt);
    let mut session = StreamSession::open();
    let events = relay(Arc::clone(&state.provider), request).map(move |event: RelayEvent| {
        if event.is_terminal() {
            session.finished = true;
        }
        event
    });

    (
        [(header::CONNECTION, "keep-alive")],
        Sse::new(sse_events(events)),
    )
}
