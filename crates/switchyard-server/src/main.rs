//! # Switchyard relay
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchyard
//!
//! # Run with environment variables
//! SWITCHYARD_PORT=8080 SWITCHYARD_HOST=0.0.0.0 switchyard
//! ```
//!
//! A `switchyard.toml` in the working directory, `/etc/switchyard/` or
//! `~/.config/switchyard/` takes precedence over the defaults.

use anyhow::Result;
use switchyard_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard=debug,switchyard_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Switchyard relay on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
