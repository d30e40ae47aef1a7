use std::sync::Arc;
use crate::rate_limit::RateLimiter;
use crate::upstream::CompletionProvider;

// app's shared state
pub struct AppState {
    pub provider: Arc<dyn CompletionProvider>,
    pub model: String,
    pub rate_limiter: Arc<RateLimiter>,
    pub trust_proxy: usize, // X-Forwarded-For hops to trust
}
