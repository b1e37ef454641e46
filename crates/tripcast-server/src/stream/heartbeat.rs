//! Keepalive loop for one stream session.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use tripcast_core::TripEvent;

use super::session::StreamSession;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The session was terminated elsewhere.
    Cancelled,
    /// The transport closed while the loop was waiting.
    TransportClosed,
    /// A keepalive write found the transport gone.
    WriteFailed,
}

/// Delay before the first keepalive: one interval plus up to `jitter`.
pub fn first_tick_delay(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let max_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    interval + Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Push a `keepalive` every `interval` until the session ends.
///
/// Also watches the transport, so a peer that disappears between
/// heartbeats is cleaned up the moment the close is observed rather than at
/// the next write. Spawned tasks never keep the runtime alive, so this loop
/// does not block process shutdown.
pub async fn run_heartbeat(
    session: Arc<StreamSession>,
    interval: Duration,
    first_delay: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    // `interval_at` panics on a zero period.
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + first_delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let keepalive = TripEvent::keepalive(session.trip_id().clone());

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            reason = session.transport_closed() => {
                session.terminate(reason);
                return HeartbeatResult::TransportClosed;
            }
            _ = ticker.tick() => {
                if !session.push(&keepalive) && session.is_terminated() {
                    return HeartbeatResult::WriteFailed;
                }
                trace!(trip_id = %session.trip_id(), session_id = %session.id(), "sent keepalive");
            }
        }
    }
}
