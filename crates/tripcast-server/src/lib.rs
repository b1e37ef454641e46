//! # tripcast-server
//!
//! Axum HTTP server that pushes trip change notifications over Server-Sent
//! Events.
//!
//! - Stream registry: trip id → live stream sessions, empty groups removed
//! - Per-session heartbeat keeping idle connections open through proxies
//! - Best-effort fan-out where a failed write retires only that subscriber
//! - HTTP endpoints: stream open, notify, health check
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod stream;
