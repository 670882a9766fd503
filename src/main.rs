//! Ludo Session Server
//!
//! Loads configuration from the environment and serves WebSocket clients
//! until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ludo::{GameServer, ServerConfig, VERSION};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env();
    info!("Ludo Server v{}", VERSION);
    info!(
        "Roll timeout: {:?}, move timeout: {:?}, backfill every {:?}",
        config.timings.roll_timeout, config.timings.move_timeout, config.matchmaking.backfill_interval,
    );

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;

    // Rooms and connections flush their shutdown notices
    tokio::time::sleep(Duration::from_millis(250)).await;
    info!("Server stopped");
    Ok(())
}
