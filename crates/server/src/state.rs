// crates/server/src/state.rs
//! Application state for the Axum server.

use crate::config::ServerConfig;
use ragpipe_jobs::JobStore;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state accessible from all route handlers.
///
/// Constructed once at startup and passed by reference everywhere; the job
/// store's sweeper thread lives exactly as long as this state does.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Resolved configuration.
    pub config: ServerConfig,
    /// The in-memory job registry.
    pub store: JobStore,
    /// Shared HTTP client for crawl fetches.
    pub http: reqwest::Client,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let store = JobStore::new(config.store_config());
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            store,
            http: reqwest::Client::new(),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
