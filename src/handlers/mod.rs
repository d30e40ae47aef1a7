mod chat_stream;
mod health;
mod metrics;
mod quota;

pub use chat_stream::chat_stream_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use quota::quota_gate;
