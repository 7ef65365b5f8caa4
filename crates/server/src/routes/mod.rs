// crates/server/src/routes/mod.rs
//! API route modules.

pub mod admin;
pub mod crawl;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod pipeline;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

/// Build the `/api` router with all endpoints attached.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(health::router())
                .merge(jobs::router())
                .merge(crawl::router())
                .merge(pipeline::router())
                .merge(admin::router())
                .merge(metrics::router()),
        )
        .with_state(state)
}
