//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stream::RegistryConfig;

/// Configuration for the tripcast server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Seconds between keepalive frames on an idle stream.
    pub heartbeat_interval_secs: u64,
    /// Maximum random delay, in milliseconds, added to each stream's first
    /// keepalive. `0` disables jitter.
    pub heartbeat_jitter_ms: u64,
    /// Frames that may queue per stream before new events are dropped.
    pub stream_queue_capacity: usize,
    /// Seconds to wait for in-flight requests during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_secs: 25,
            heartbeat_jitter_ms: 0,
            stream_queue_capacity: 64,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Registry settings derived from this config.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            heartbeat_jitter: Duration::from_millis(self.heartbeat_jitter_ms),
        }
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
