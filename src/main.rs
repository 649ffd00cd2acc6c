//! Tool Gateway Entry Point
//!
//! Initializes logging, loads configuration, restores installed plugins,
//! starts background maintenance, and serves the gateway with the
//! configured transport.

use std::sync::Arc;

use anyhow::Result;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use tool_gateway::core::{Config, Gateway, TransportService};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize logging
    init_logging(&config.logging.level, config.logging.with_timestamps);

    info!("Starting {} v{}", config.server.name, config.server.version);
    if config.auth.admin_key.is_none() {
        warn!("No admin key configured; admin routes will reject every request");
    }

    let transport = TransportService::new(config.transport.clone());
    let gateway = Arc::new(Gateway::new(config));

    match gateway.restore_plugins().await {
        Ok(restored) => info!(restored, "Gateway initialized"),
        Err(e) => warn!(error = %e, "Failed to restore plugins; continuing without them"),
    }
    let _maintenance = gateway.spawn_maintenance();

    // Bind failures are the only fatal transport error
    transport.run(gateway).await?;

    info!("Gateway shutting down");

    Ok(())
}

/// Initialize the logging subsystem.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_logging(level: &str, with_timestamps: bool) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if with_timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
