//! # tripcast
//!
//! Server binary: parses flags, sets up logging, serves trip streams until
//! Ctrl-C or SIGTERM, then shuts down gracefully.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use tripcast_core::logging::{self, LogFormat};
use tripcast_server::config::ServerConfig;
use tripcast_server::server::StreamServer;
use tripcast_server::shutdown;

/// Trip change notification server.
#[derive(Parser, Debug)]
#[command(name = "tripcast", about = "Trip change notification server over SSE")]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "TRIPCAST_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "TRIPCAST_PORT", default_value = "8787")]
    port: u16,

    /// Seconds between keepalive frames on idle streams.
    #[arg(long, env = "TRIPCAST_HEARTBEAT_SECS", default_value = "25")]
    heartbeat_secs: u64,

    /// Maximum random offset (ms) added to each stream's first keepalive.
    #[arg(long, env = "TRIPCAST_HEARTBEAT_JITTER_MS", default_value = "0")]
    heartbeat_jitter_ms: u64,

    /// Frames buffered per stream before events are dropped.
    #[arg(long, env = "TRIPCAST_QUEUE_CAPACITY", default_value = "64")]
    queue_capacity: usize,

    /// Seconds to wait for connections to drain on shutdown.
    #[arg(long, env = "TRIPCAST_SHUTDOWN_TIMEOUT_SECS", default_value = "10")]
    shutdown_timeout_secs: u64,

    /// Default log level (overridden by `RUST_LOG`).
    #[arg(long, env = "TRIPCAST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format: `compact` or `json`.
    #[arg(long, env = "TRIPCAST_LOG_FORMAT", default_value = "compact")]
    log_format: String,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            heartbeat_interval_secs: self.heartbeat_secs,
            heartbeat_jitter_ms: self.heartbeat_jitter_ms,
            stream_queue_capacity: self.queue_capacity,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_subscriber(&cli.log_level, LogFormat::from_str_lossy(&cli.log_format));

    let config = cli.server_config();
    tracing::info!(
        heartbeat_secs = config.heartbeat_interval_secs,
        jitter_ms = config.heartbeat_jitter_ms,
        queue_capacity = config.stream_queue_capacity,
        "starting tripcast"
    );

    let handle = StreamServer::new(config)
        .start()
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.addr(), "tripcast ready");

    shutdown::wait_for_signal().await;
    handle.shutdown().await;
    Ok(())
}
