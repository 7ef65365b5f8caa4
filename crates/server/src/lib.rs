// crates/server/src/lib.rs
//! Ragpipe server library.
//!
//! Axum-based HTTP server around the in-memory job store: request handlers
//! create jobs and dispatch their task bodies, then clients follow progress
//! over the job summary and SSE stream endpoints.

pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod tasks;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, crawl, pipeline, admin, metrics)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
