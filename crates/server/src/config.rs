// crates/server/src/config.rs
//! Environment-driven server configuration.
//!
//! Every knob has a default that works out of a fresh checkout; production
//! deployments override via `RAGPIPE_*` variables.

use ragpipe_jobs::StoreConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Default port for the server.
const DEFAULT_PORT: u16 = 8420;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Root of the working data set: `raw/`, `processed/`, `index/`, `seen.json`.
    pub data_dir: PathBuf,
    /// Where backup jobs write their copies.
    pub backup_dir: PathBuf,
    /// Soft cap on jobs held in memory.
    pub max_jobs: usize,
    /// TTL for terminal jobs, in hours.
    pub ttl_hours: i64,
    /// Eviction sweep wake interval, in seconds.
    pub sweep_interval_secs: u64,
    /// Default listing URL for crawl jobs; requests may override per call.
    pub crawl_base_url: Option<String>,
    /// Default page limit for crawl jobs.
    pub crawl_max_pages: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            backup_dir: PathBuf::from("backups"),
            max_jobs: 200,
            ttl_hours: 24,
            sweep_interval_secs: 300,
            crawl_base_url: None,
            crawl_max_pages: 5,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("RAGPIPE_PORT", defaults.port),
            data_dir: env_path("RAGPIPE_DATA_DIR", defaults.data_dir),
            backup_dir: env_path("RAGPIPE_BACKUP_DIR", defaults.backup_dir),
            max_jobs: env_parse("RAGPIPE_MAX_JOBS", defaults.max_jobs),
            ttl_hours: env_parse("RAGPIPE_JOB_TTL_HOURS", defaults.ttl_hours),
            sweep_interval_secs: env_parse(
                "RAGPIPE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            ),
            crawl_base_url: std::env::var("RAGPIPE_CRAWL_BASE_URL")
                .ok()
                .filter(|value| !value.is_empty()),
            crawl_max_pages: env_parse("RAGPIPE_CRAWL_MAX_PAGES", defaults.crawl_max_pages),
        }
    }

    /// The job-store slice of this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_jobs: self.max_jobs,
            ttl_hours: self.ttl_hours,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or(default)
}
