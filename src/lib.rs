//! Streaming chat relay.
//!
//! Accepts a prompt from a browser client, forwards it to an OpenAI-compatible
//! completion API with the server-held key, and streams fragments back as
//! server-sent events. The relay route sits behind a per-client daily quota.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod relay;
pub mod state;
pub mod upstream;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers::{chat_stream_handler, health_handler, metrics_handler, quota_gate};
use crate::state::AppState;

pub const RELAY_PATH: &str = "/chat-stream";

/// Only the exact listed origins get CORS headers, with credentials allowed.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// creating the router with routes, quota gate only on the relay route
pub fn build_router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    let gated = post(chat_stream_handler)
        .route_layer(middleware::from_fn_with_state(state.clone(), quota_gate));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(RELAY_PATH, gated)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
