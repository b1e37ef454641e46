//! Events pushed down a trip stream and their SSE framing.
//!
//! Every event serializes to a flat JSON object with at least `type` and
//! `trip_id`. `refresh` events merge the caller's payload fields in at the top
//! level. The `type` and `trip_id` keys are owned by the event and overwrite
//! same-named payload keys, so a payload can never re-route or re-tag a frame.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::TripId;

/// Discriminator written to the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// First frame on every stream; acknowledges the subscription.
    Ready,
    /// Trip state changed; clients should refetch.
    Refresh,
    /// Idle-connection heartbeat.
    Keepalive,
}

impl EventKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Refresh => "refresh",
            Self::Keepalive => "keepalive",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transient event addressed to a trip's subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct TripEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Trip the event belongs to.
    pub trip_id: TripId,
    /// Extra fields; only populated for `refresh`.
    pub payload: Map<String, Value>,
}

impl TripEvent {
    /// Subscription acknowledgment.
    #[must_use]
    pub fn ready(trip_id: TripId) -> Self {
        Self {
            kind: EventKind::Ready,
            trip_id,
            payload: Map::new(),
        }
    }

    /// State-change notification carrying arbitrary caller fields.
    #[must_use]
    pub fn refresh(trip_id: TripId, payload: Map<String, Value>) -> Self {
        Self {
            kind: EventKind::Refresh,
            trip_id,
            payload,
        }
    }

    /// Heartbeat.
    #[must_use]
    pub fn keepalive(trip_id: TripId) -> Self {
        Self {
            kind: EventKind::Keepalive,
            trip_id,
            payload: Map::new(),
        }
    }

    /// Flat JSON object for the wire.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut obj = self.payload.clone();
        let _ = obj.insert("type".into(), Value::String(self.kind.as_str().into()));
        let _ = obj.insert("trip_id".into(), Value::String(self.trip_id.as_str().into()));
        Value::Object(obj)
    }

    /// Encode as one SSE frame: a `data:` line terminated by a blank line.
    #[must_use]
    pub fn to_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}
