//! Climate Readings Service - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load configuration")?;
    init_logging(&settings.logging)?;

    info!("=== Climate Readings Service v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", settings.database.url);

    run_server(settings).await
}
