//! Trip-keyed registry of open streams.
//!
//! ```text
//!                 Arc<ConnectionRegistry>
//!            ┌──────────────────────────────┐
//!            │ trips: DashMap<TripId,       │
//!            │   HashMap<SessionId,         │
//!            │     Arc<StreamSession>>>     │
//!            └──────────────┬───────────────┘
//!                           │ broadcast(trip, payload)
//!          ┌────────────────┼────────────────┐
//!          ▼                ▼                ▼
//!   [StreamSession]  [StreamSession]  [StreamSession]
//!     heartbeat        heartbeat        heartbeat
//!          │                │                │
//!          └──► Transport ──► SSE body ──► client
//! ```
//!
//! A trip entry exists only while it has at least one member. Set mutations
//! happen under the map's shard lock; fan-out clones the member list out of
//! the lock first, because a failed write re-enters the registry to remove
//! the dead session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info, trace, warn};
use tripcast_core::{EventKind, SessionId, TripEvent, TripId};

use super::heartbeat;
use super::session::{SessionHandle, StreamSession, TerminationReason};
use super::transport::Transport;

/// Default keepalive period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Tunables for a [`ConnectionRegistry`].
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Time between keepalives on an otherwise idle stream.
    pub heartbeat_interval: Duration,
    /// Upper bound of a random offset added to each session's first
    /// keepalive, spreading heartbeats of streams opened together.
    pub heartbeat_jitter: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_jitter: Duration::ZERO,
        }
    }
}

/// Live SSE subscribers grouped by trip.
pub struct ConnectionRegistry {
    trips: DashMap<TripId, HashMap<SessionId, SessionHandle>>,
    config: RegistryConfig,
    shutting_down: AtomicBool,
}

impl ConnectionRegistry {
    /// Create an empty registry with default settings.
    pub fn new() -> Arc<Self> {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry.
    pub fn with_config(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            trips: DashMap::new(),
            config,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Registry settings.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new stream for `trip_id` over `transport`.
    ///
    /// The `ready` acknowledgment is written before the session is visible to
    /// [`broadcast`](Self::broadcast) and before its heartbeat starts, so it is
    /// always the first frame the subscriber sees. If the transport is already
    /// closed, or the registry is shutting down, the returned handle is
    /// terminated and nothing is registered.
    ///
    /// The heartbeat runs on the current tokio runtime. Called outside one,
    /// the stream is still registered but gets no keepalives.
    pub fn subscribe(self: &Arc<Self>, trip_id: TripId, transport: impl Transport) -> SessionHandle {
        let session = Arc::new(StreamSession::new(
            trip_id.clone(),
            Box::new(transport),
            Arc::downgrade(self),
        ));

        if self.is_shutting_down() {
            session.terminate(TerminationReason::Shutdown);
            return session;
        }

        let _ = session.push(&TripEvent::ready(trip_id.clone()));
        if session.is_terminated() {
            debug!(trip_id = %trip_id, session_id = %session.id(), "transport closed before subscribe");
            return session;
        }

        let _ = self
            .trips
            .entry(trip_id.clone())
            .or_default()
            .insert(session.id().clone(), Arc::clone(&session));

        // A close trigger may have fired between the ready write and the
        // insert; its removal would have missed the entry.
        if session.is_terminated() {
            let _ = self.remove(&trip_id, session.id());
            return session;
        }
        // `shut_down` sets the flag before snapshotting; one of the two sides
        // always sees this session.
        if self.is_shutting_down() {
            session.terminate(TerminationReason::Shutdown);
            return session;
        }

        self.spawn_heartbeat(&session);

        info!(
            trip_id = %trip_id,
            session_id = %session.id(),
            subscribers = self.subscriber_count(&trip_id),
            "stream opened"
        );
        session
    }

    fn spawn_heartbeat(&self, session: &SessionHandle) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                trip_id = %session.trip_id(),
                session_id = %session.id(),
                "no tokio runtime, stream opened without heartbeat"
            );
            return;
        };
        let interval = self.config.heartbeat_interval;
        let first = heartbeat::first_tick_delay(interval, self.config.heartbeat_jitter);
        let session = Arc::clone(session);
        let cancel = session.heartbeat_token();
        let _ = runtime.spawn(async move {
            let result = heartbeat::run_heartbeat(Arc::clone(&session), interval, first, cancel).await;
            trace!(session_id = %session.id(), ?result, "heartbeat stopped");
        });
    }

    /// Terminate `session` and remove it from its trip. Idempotent.
    pub fn unsubscribe(&self, session: &StreamSession) {
        session.terminate(TerminationReason::Unsubscribed);
    }

    /// Push a `refresh` carrying `payload` to every live subscriber of
    /// `trip_id`. Returns how many subscribers the event was written to.
    ///
    /// No subscribers is not an error. A failed write retires that one
    /// subscriber and delivery to the rest continues.
    pub fn broadcast(&self, trip_id: &TripId, payload: Map<String, Value>) -> usize {
        let members: Vec<SessionHandle> = match self.trips.get(trip_id) {
            Some(set) => set.values().cloned().collect(),
            None => {
                debug!(trip_id = %trip_id, "broadcast with no subscribers");
                return 0;
            }
        };

        let frame = TripEvent::refresh(trip_id.clone(), payload).to_frame();
        let delivered = members
            .iter()
            .filter(|session| session.push_frame(EventKind::Refresh, &frame))
            .count();

        debug!(
            trip_id = %trip_id,
            recipients = members.len(),
            delivered,
            "broadcast refresh"
        );
        delivered
    }

    /// Terminate every open stream.
    pub fn close_all(&self) -> usize {
        let sessions: Vec<SessionHandle> = self
            .trips
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect();
        for session in &sessions {
            session.terminate(TerminationReason::Shutdown);
        }
        if !sessions.is_empty() {
            info!(closed = sessions.len(), "closed all streams");
        }
        sessions.len()
    }

    /// Refuse new streams from now on and terminate every open one.
    pub fn shut_down(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.close_all()
    }

    /// Whether [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of trips with at least one subscriber.
    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    /// Whether `trip_id` currently has an entry.
    pub fn contains_trip(&self, trip_id: &TripId) -> bool {
        self.trips.contains_key(trip_id)
    }

    /// Subscribers of one trip.
    pub fn subscriber_count(&self, trip_id: &TripId) -> usize {
        self.trips.get(trip_id).map_or(0, |set| set.len())
    }

    /// Subscribers across all trips.
    pub fn total_subscribers(&self) -> usize {
        self.trips.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drop one member and, if that empties the trip, the trip entry.
    /// Missing trips or members are ignored.
    pub(super) fn remove(&self, trip_id: &TripId, session_id: &SessionId) -> bool {
        let removed = self
            .trips
            .get_mut(trip_id)
            .is_some_and(|mut set| set.remove(session_id).is_some());
        let _ = self.trips.remove_if(trip_id, |_, set| set.is_empty());
        removed
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("trips", &self.trip_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transport::{ChannelTransport, TransportBody};
    use futures::{FutureExt, Stream, StreamExt};
    use serde_json::json;
    use std::pin::Pin;

    type Frames = Pin<Box<dyn Stream<Item = String> + Send>>;

    fn subscribe(registry: &Arc<ConnectionRegistry>, trip: &str) -> (SessionHandle, Frames) {
        let (transport, body) = ChannelTransport::new(16);
        let session = registry.subscribe(TripId::from(trip), transport);
        (session, Box::pin(body.into_stream()))
    }

    fn parse(frame: &str) -> Value {
        let body = frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .expect("not an SSE data frame");
        serde_json::from_str(body).unwrap()
    }

    async fn next_event(frames: &mut Frames) -> Value {
        parse(&frames.next().await.expect("stream ended"))
    }

    /// Frames already queued, without waiting for more.
    fn drain(frames: &mut Frames) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(Some(frame)) = frames.next().now_or_never() {
            out.push(parse(&frame));
        }
        out
    }

    fn payload(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn ready_is_first_event() {
        let registry = ConnectionRegistry::new();
        let (_s, mut frames) = subscribe(&registry, "T1");
        let ready = next_event(&mut frames).await;
        assert_eq!(ready, json!({"type": "ready", "trip_id": "T1"}));
        assert!(drain(&mut frames).is_empty());
    }

    #[tokio::test]
    async fn ready_precedes_broadcast() {
        let registry = ConnectionRegistry::new();
        let (_s, mut frames) = subscribe(&registry, "T1");
        let _ = registry.broadcast(&TripId::from("T1"), payload(json!({"status": "booked"})));
        let events = drain(&mut frames);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "ready");
        assert_eq!(events[1]["type"], "refresh");
    }

    #[tokio::test]
    async fn ready_is_not_broadcast_to_others() {
        let registry = ConnectionRegistry::new();
        let (_s1, mut f1) = subscribe(&registry, "T1");
        let _ = drain(&mut f1);
        let (_s2, _f2) = subscribe(&registry, "T1");
        assert!(drain(&mut f1).is_empty());
    }

    #[tokio::test]
    async fn broadcast_scenario_across_groups() {
        let registry = ConnectionRegistry::new();
        let t1 = TripId::from("T1");
        let (s1, mut f1) = subscribe(&registry, "T1");
        let (s2, mut f2) = subscribe(&registry, "T1");
        let (_s3, mut f3) = subscribe(&registry, "T2");
        for f in [&mut f1, &mut f2, &mut f3] {
            assert_eq!(drain(f).len(), 1);
        }

        let delivered = registry.broadcast(&t1, payload(json!({"status": "booked"})));
        assert_eq!(delivered, 2);
        let expected = json!({"type": "refresh", "trip_id": "T1", "status": "booked"});
        assert_eq!(drain(&mut f1), vec![expected.clone()]);
        assert_eq!(drain(&mut f2), vec![expected.clone()]);
        assert!(drain(&mut f3).is_empty());

        s1.terminate(TerminationReason::PeerClosed);
        let delivered = registry.broadcast(&t1, payload(json!({"status": "booked"})));
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut f2), vec![expected]);
        assert_eq!(registry.subscriber_count(&t1), 1);

        s2.terminate(TerminationReason::PeerClosed);
        assert!(!registry.contains_trip(&t1));
        assert_eq!(registry.trip_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_to_unknown_trip_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast(&TripId::from("nobody"), Map::new()), 0);
        assert_eq!(registry.trip_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_after_last_member_left() {
        let registry = ConnectionRegistry::new();
        let (s, _f) = subscribe(&registry, "T1");
        s.terminate(TerminationReason::PeerClosed);
        assert_eq!(registry.broadcast(&TripId::from("T1"), Map::new()), 0);
        assert!(!registry.contains_trip(&TripId::from("T1")));
    }

    #[tokio::test]
    async fn failed_write_retires_only_that_subscriber() {
        let registry = ConnectionRegistry::new();
        let t1 = TripId::from("T1");
        let (dead, dead_frames) = subscribe(&registry, "T1");
        let (_alive, mut alive_frames) = subscribe(&registry, "T1");
        let _ = drain(&mut alive_frames);

        // Client vanished without the close notification reaching us yet.
        drop(dead_frames);

        let delivered = registry.broadcast(&t1, payload(json!({"n": 1})));
        assert_eq!(delivered, 1);
        assert!(dead.is_terminated());
        assert_eq!(registry.subscriber_count(&t1), 1);
        assert_eq!(drain(&mut alive_frames).len(), 1);
    }

    #[tokio::test]
    async fn subscribe_on_closed_transport() {
        let registry = ConnectionRegistry::new();
        let (transport, body) = ChannelTransport::new(4);
        drop(body);
        let session = registry.subscribe(TripId::from("T1"), transport);
        assert!(session.is_terminated());
        assert_eq!(registry.trip_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_on_ended_transport() {
        let registry = ConnectionRegistry::new();
        let (transport, _body): (ChannelTransport, TransportBody) = ChannelTransport::new(4);
        transport.end();
        let session = registry.subscribe(TripId::from("T1"), transport);
        assert!(session.is_terminated());
        assert!(!registry.contains_trip(&TripId::from("T1")));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (s, _f) = subscribe(&registry, "T1");
        let (_other, _g) = subscribe(&registry, "T1");
        registry.unsubscribe(&s);
        registry.unsubscribe(&s);
        s.terminate(TerminationReason::RequestClosed);
        assert!(s.is_terminated());
        assert_eq!(registry.subscriber_count(&TripId::from("T1")), 1);
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream() {
        let registry = ConnectionRegistry::new();
        let (s, mut f) = subscribe(&registry, "T1");
        let _ = next_event(&mut f).await;
        registry.unsubscribe(&s);
        assert!(f.next().await.is_none());
    }

    #[tokio::test]
    async fn remove_missing_entries_is_tolerated() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.remove(&TripId::from("gone"), &SessionId::new()));
        let (s, _f) = subscribe(&registry, "T1");
        assert!(!registry.remove(&TripId::from("T1"), &SessionId::new()));
        assert!(registry.remove(&TripId::from("T1"), s.id()));
        assert!(!registry.remove(&TripId::from("T1"), s.id()));
        assert_eq!(registry.trip_count(), 0);
    }

    #[tokio::test]
    async fn peer_close_cleans_up_without_broadcast() {
        let registry = ConnectionRegistry::new();
        let (s, f) = subscribe(&registry, "T1");
        drop(f);
        for _ in 0..100 {
            if s.is_terminated() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(s.is_terminated());
        assert_eq!(registry.trip_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_subscriber_gets_keepalive() {
        let registry = ConnectionRegistry::new();
        let (_s, mut f) = subscribe(&registry, "T7");
        assert_eq!(next_event(&mut f).await["type"], "ready");
        let keepalive = next_event(&mut f).await;
        assert_eq!(keepalive, json!({"type": "keepalive", "trip_id": "T7"}));
    }

    #[tokio::test]
    async fn close_all_empties_registry() {
        let registry = ConnectionRegistry::new();
        let (a, _fa) = subscribe(&registry, "T1");
        let (b, _fb) = subscribe(&registry, "T2");
        let (c, _fc) = subscribe(&registry, "T2");
        assert_eq!(registry.total_subscribers(), 3);
        assert_eq!(registry.close_all(), 3);
        assert_eq!(registry.trip_count(), 0);
        assert!(a.is_terminated() && b.is_terminated() && c.is_terminated());
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_is_retired_on_broadcast() {
        let registry = ConnectionRegistry::new();
        let t1 = TripId::from("T1");
        // Room for one frame; `ready` fills it and nothing ever reads.
        let (transport, _body) = ChannelTransport::new(1);
        let stalled = registry.subscribe(t1.clone(), transport);
        let (_alive, mut alive_frames) = subscribe(&registry, "T1");
        let _ = drain(&mut alive_frames);

        let delivered = registry.broadcast(&t1, payload(json!({"status": "booked"})));
        assert_eq!(delivered, 1);
        assert!(stalled.is_terminated());
        assert_eq!(registry.subscriber_count(&t1), 1);
        assert_eq!(drain(&mut alive_frames).len(), 1);
    }

    #[tokio::test]
    async fn shut_down_refuses_new_streams() {
        let registry = ConnectionRegistry::new();
        let (open, _f) = subscribe(&registry, "T1");
        assert_eq!(registry.shut_down(), 1);
        assert!(registry.is_shutting_down());
        assert!(open.is_terminated());

        let (late, mut late_frames) = subscribe(&registry, "T1");
        assert!(late.is_terminated());
        assert!(late_frames.next().await.is_none());
        assert_eq!(registry.trip_count(), 0);
    }

    #[test]
    fn subscribe_outside_runtime_registers_without_heartbeat() {
        let registry = ConnectionRegistry::new();
        let (session, mut frames) = subscribe(&registry, "T1");
        assert!(!session.is_terminated());
        assert_eq!(registry.subscriber_count(&TripId::from("T1")), 1);
        let events = drain(&mut frames);
        assert_eq!(events, vec![json!({"type": "ready", "trip_id": "T1"})]);
        registry.unsubscribe(&session);
        assert_eq!(registry.trip_count(), 0);
    }

    #[tokio::test]
    async fn independent_registries() {
        let left = ConnectionRegistry::new();
        let right = ConnectionRegistry::new();
        let (_s, mut f) = subscribe(&left, "T1");
        let _ = drain(&mut f);
        assert_eq!(right.broadcast(&TripId::from("T1"), Map::new()), 0);
        assert!(drain(&mut f).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_and_close() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();
        for i in 0..64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let trip = format!("T{}", i % 4);
                let (transport, body) = ChannelTransport::new(4);
                let session = registry.subscribe(TripId::from(trip.as_str()), transport);
                let _ = registry.broadcast(&TripId::from(trip.as_str()), Map::new());
                drop(body);
                session.terminate(TerminationReason::PeerClosed);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.trip_count(), 0);
        assert_eq!(registry.total_subscribers(), 0);
    }
}
