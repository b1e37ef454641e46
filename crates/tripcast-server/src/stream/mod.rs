//! SSE stream management: registry, sessions, heartbeat, transport and the
//! two entry points the HTTP layer calls.

pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
pub mod transport;

pub use handler::{notify, open_stream};
pub use registry::{ConnectionRegistry, RegistryConfig};
pub use session::{SessionHandle, StreamSession, TerminationReason};
pub use transport::{ChannelTransport, Transport, TransportBody};
