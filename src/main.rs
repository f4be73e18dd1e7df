//! ws-echo: A concurrent WebSocket echo server
//!
//! Accepts TCP connections, upgrades each one to a WebSocket session and
//! echoes every text or binary message back to its sender until the peer
//! closes the session.
//!
//! Features:
//! - One task per session on a shared multi-thread worker pool
//! - Handshake and idle timeouts per session
//! - Configuration via CLI arguments and an optional TOML file

mod config;
mod error;
mod listener;
mod server;
mod session;
mod stats;

use config::Config;
use error::ServerError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), ServerError> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        address = %config.listen,
        threads = config.threads,
        handshake_timeout = ?config.session.handshake_timeout,
        idle_timeout = ?config.session.idle_timeout,
        "Starting ws-echo server"
    );

    if let Err(e) = server::run(config) {
        error!(error = %e, "Server failed");
        return Err(e);
    }

    Ok(())
}
