//! # Chatline Server
//!
//! Channel-based chat server with SSE delivery and in-memory history.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chatline
//!
//! # Run with environment variables
//! CHATLINE_PORT=8080 CHATLINE_HOST=0.0.0.0 chatline
//! ```
//!
//! Configuration is read from `chatline.toml` when present.

mod config;
mod handlers;
mod hub;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Chatline server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
