use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod db;
mod error;
mod server;

fn default_filter() -> EnvFilter {
    EnvFilter::new("info,perch_server=debug,perch_realtime=debug")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter()),
        )
        .init();

    info!("Perch Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = config::ServerConfig::from_env();
    server::start(config).await?;

    Ok(())
}
