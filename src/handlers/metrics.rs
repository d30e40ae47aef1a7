use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

pub async fn metrics_handler() -> Response {
    match crate::metrics::render() {
        Ok(body) => body.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
