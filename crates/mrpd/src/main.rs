//! MRP daemon binary

use anyhow::Context;
use mrpd::{Config, Daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (needed for logging settings)
    let config = Config::load().context("loading configuration")?;

    let level = config.logging.level.as_deref().unwrap_or("info");
    let json = config.logging.format.as_deref() == Some("json");
    common::logging::init_with_level(level, json);

    tracing::info!(
        ports = config.ports.len(),
        instances = config.instances.len(),
        "MRP daemon configured"
    );

    Daemon::new(config).run().await?;

    Ok(())
}
