use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::QUOTA_EXCEEDED_MESSAGE;
use crate::metrics::{QUOTA_REJECTIONS, REQUEST_TOTAL};
use crate::models::RejectBody;
use crate::rate_limit::{QuotaStatus, client_key};
use crate::state::AppState;

const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

// Quota gate middleware, only layered onto the relay route
pub async fn quota_gate(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    REQUEST_TOTAL.inc();

    let key = client_key(peer, request.headers(), state.trust_proxy);
    let decision = state.rate_limiter.check(&key);
    let status = decision.status();

    let mut response = if decision.is_admitted() {
        debug!(client = %key, remaining = status.remaining, "Quota admitted");
        next.run(request).await
    } else {
        QUOTA_REJECTIONS.inc();
        warn!(client = %key, limit = status.limit, "Quota exceeded");
        let body = RejectBody {
            success: false,
            error: QUOTA_EXCEEDED_MESSAGE.to_string(),
        };
        let mut refused = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        refused
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(ceil_secs(status.reset_after)));
        refused
    };

    insert_quota_headers(response.headers_mut(), &status, state.rate_limiter.window());
    response
}

fn insert_quota_headers(headers: &mut HeaderMap, status: &QuotaStatus, window: Duration) {
    if let Ok(policy) = HeaderValue::from_str(&format!("{};w={}", status.limit, window.as_secs())) {
        headers.insert(RATELIMIT_POLICY, policy);
    }
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(status.reset_after)));
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
