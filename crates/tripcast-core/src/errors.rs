//! Error types shared between the registry and transport implementations.

use thiserror::Error;

/// Why a write to a subscriber's transport did not go through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport was ended locally (`end()` was called).
    #[error("transport already ended")]
    Ended,
    /// The remote side is gone; nothing will ever read this transport again.
    #[error("transport destroyed")]
    Destroyed,
    /// The outbound queue is full; the reader is alive but behind.
    #[error("transport send queue full")]
    Full,
}

impl TransportError {
    /// Whether this failure means the subscriber is gone for good.
    #[must_use]
    pub const fn is_disconnect(self) -> bool {
        matches!(self, Self::Ended | Self::Destroyed)
    }

    /// Short classification string for logging.
    #[must_use]
    pub const fn error_kind(self) -> &'static str {
        match self {
            Self::Ended => "ended",
            Self::Destroyed => "destroyed",
            Self::Full => "full",
        }
    }
}
