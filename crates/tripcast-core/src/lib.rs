//! # tripcast-core
//!
//! Shared vocabulary for the tripcast crates:
//!
//! - **Branded IDs**: `TripId` (the broadcast group key) and `SessionId`
//! - **Wire events**: `TripEvent` and its SSE frame encoding
//! - **Errors**: `TransportError` via `thiserror`
//! - **Logging**: one-shot `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;

pub use errors::TransportError;
pub use events::{EventKind, TripEvent};
pub use ids::{SessionId, TripId};
