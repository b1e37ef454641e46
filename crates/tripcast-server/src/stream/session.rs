//! One accepted SSE connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tripcast_core::{EventKind, SessionId, TripEvent, TripId};

use super::registry::ConnectionRegistry;
use super::transport::Transport;

/// Handle returned by [`ConnectionRegistry::subscribe`]. Dropping it does not
/// close the stream; call [`StreamSession::terminate`] or
/// [`ConnectionRegistry::unsubscribe`].
pub type SessionHandle = Arc<StreamSession>;

/// What ended a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// The remote peer went away (transport receiver dropped).
    PeerClosed,
    /// The HTTP request/response context was torn down.
    RequestClosed,
    /// The transport reached its end state.
    Finished,
    /// The transport rejected a write: gone, ended or backed up.
    WriteFailed,
    /// Explicit unsubscribe by the owner of the handle.
    Unsubscribed,
    /// Server shutdown.
    Shutdown,
}

impl TerminationReason {
    /// Short name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::RequestClosed => "request_closed",
            Self::Finished => "finished",
            Self::WriteFailed => "write_failed",
            Self::Unsubscribed => "unsubscribed",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open, one-way stream to a single subscriber of one trip.
///
/// State is `Open` until the first call to [`terminate`](Self::terminate),
/// then `Terminated` for good. Every termination trigger (peer close, request
/// teardown, transport end, failed write) funnels into that one call, and
/// only the first one does any work.
pub struct StreamSession {
    id: SessionId,
    trip_id: TripId,
    transport: Box<dyn Transport>,
    registry: Weak<ConnectionRegistry>,
    heartbeat: CancellationToken,
    terminated: AtomicBool,
    connected_at: Instant,
}

impl StreamSession {
    pub(super) fn new(
        trip_id: TripId,
        transport: Box<dyn Transport>,
        registry: Weak<ConnectionRegistry>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            trip_id,
            transport,
            registry,
            heartbeat: CancellationToken::new(),
            terminated: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Trip this session is subscribed to.
    pub fn trip_id(&self) -> &TripId {
        &self.trip_id
    }

    /// Whether the session has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Time since the stream was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Push one event. Returns `true` if it was handed to the transport.
    pub fn push(&self, event: &TripEvent) -> bool {
        self.push_frame(event.kind, &event.to_frame())
    }

    /// Push an already-encoded frame.
    ///
    /// Any rejected write terminates the session, a full queue included.
    /// Frames are never dropped from a stream that stays open.
    pub(crate) fn push_frame(&self, kind: EventKind, frame: &str) -> bool {
        if self.is_terminated() {
            return false;
        }
        if self.transport.is_ended() || self.transport.is_destroyed() {
            self.terminate(TerminationReason::WriteFailed);
            return false;
        }
        match self.transport.write(frame) {
            Ok(()) => true,
            Err(e) => {
                if e.is_disconnect() {
                    debug!(
                        trip_id = %self.trip_id,
                        session_id = %self.id,
                        event = %kind,
                        error = e.error_kind(),
                        "stream write failed"
                    );
                } else {
                    warn!(
                        trip_id = %self.trip_id,
                        session_id = %self.id,
                        event = %kind,
                        "stream queue full, closing slow subscriber"
                    );
                }
                self.terminate(TerminationReason::WriteFailed);
                false
            }
        }
    }

    /// Close the session: stop the heartbeat, end the transport and leave the
    /// registry. Safe to call any number of times from any trigger.
    pub fn terminate(&self, reason: TerminationReason) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.heartbeat.cancel();
        self.transport.end();
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.remove(&self.trip_id, &self.id);
        }
        info!(
            trip_id = %self.trip_id,
            session_id = %self.id,
            %reason,
            age_ms = u64::try_from(self.age().as_millis()).unwrap_or(u64::MAX),
            "stream closed"
        );
    }

    pub(super) fn heartbeat_token(&self) -> CancellationToken {
        self.heartbeat.clone()
    }

    /// Wait for the transport to report closure, then say why.
    pub(super) async fn transport_closed(&self) -> TerminationReason {
        self.transport.closed().await;
        if self.transport.is_ended() {
            TerminationReason::Finished
        } else {
            TerminationReason::PeerClosed
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("trip_id", &self.trip_id)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}
