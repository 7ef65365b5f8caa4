// crates/server/src/routes/metrics.rs
//! Prometheus exposition endpoint.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::metrics::render_metrics;
use crate::state::AppState;

/// GET /api/metrics — current metrics in Prometheus text format.
async fn metrics() -> impl IntoResponse {
    match render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not initialized\n".to_string(),
        )
            .into_response(),
    }
}

/// Build the metrics router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics))
}
