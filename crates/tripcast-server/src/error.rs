//! Server startup and runtime errors.

use thiserror::Error;

/// Errors from binding or running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Any other I/O failure of the listener.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
