use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, TextEncoder, register_counter, register_gauge,
    register_histogram,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("relay_requests_total", "Total number of chat-stream requests").unwrap();
    pub static ref QUOTA_REJECTIONS: Counter =
        register_counter!("relay_quota_rejections_total", "Requests refused by the quota gate").unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("relay_upstream_errors_total", "Streams ended by an upstream failure").unwrap();
    pub static ref FRAGMENTS_RELAYED: Counter =
        register_counter!("relay_fragments_total", "Text fragments forwarded to clients").unwrap();
    pub static ref STREAM_DURATION: Histogram = register_histogram!(
        "relay_stream_duration_seconds",
        "Time from admission until the terminal event"
    )
    .unwrap();
    pub static ref ACTIVE_STREAMS: Gauge =
        register_gauge!("relay_active_streams", "Streams currently open").unwrap();
}

// Prometheus text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
