// crates/server/src/main.rs
//! Ragpipe server binary.

use anyhow::Result;
use ragpipe_server::{create_app, init_metrics, AppState, ServerConfig};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    init_metrics();

    let config = ServerConfig::from_env();
    std::fs::create_dir_all(config.data_dir.join("raw"))?;
    std::fs::create_dir_all(config.data_dir.join("processed"))?;
    std::fs::create_dir_all(config.data_dir.join("index"))?;
    std::fs::create_dir_all(&config.backup_dir)?;

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!(
        %addr,
        data_dir = %config.data_dir.display(),
        max_jobs = config.max_jobs,
        ttl_hours = config.ttl_hours,
        "starting ragpipe v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState::new(config);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
