//! Entry points used by the HTTP layer: open a stream, notify a trip.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::debug;
use tripcast_core::TripId;

use super::registry::ConnectionRegistry;
use super::session::{SessionHandle, TerminationReason};
use super::transport::ChannelTransport;

/// Response body for one session. Dropping it terminates the session,
/// which is how hyper reports a client that went away mid-stream.
struct SessionBody {
    frames: Pin<Box<dyn Stream<Item = String> + Send>>,
    session: SessionHandle,
}

impl Stream for SessionBody {
    type Item = Result<String, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for SessionBody {
    fn drop(&mut self) {
        self.session.terminate(TerminationReason::RequestClosed);
    }
}

/// Build a long-lived SSE response subscribed to `trip_id`.
///
/// Headers mark the response as an uncached event stream and ask reverse
/// proxies not to buffer it. They go out as soon as the handler returns; the
/// `ready` frame is already queued behind them.
pub fn open_stream(
    registry: &Arc<ConnectionRegistry>,
    trip_id: TripId,
    queue_capacity: usize,
) -> Response {
    let (transport, body) = ChannelTransport::new(queue_capacity);
    let session = registry.subscribe(trip_id, transport);
    let body = SessionBody {
        frames: Box::pin(body.into_stream()),
        session,
    };

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-transform"),
            ),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Tell every stream watching `trip_id` that it changed.
pub fn notify(registry: &ConnectionRegistry, trip_id: &TripId, payload: Map<String, Value>) -> usize {
    let delivered = registry.broadcast(trip_id, payload);
    debug!(trip_id = %trip_id, delivered, "trip notified");
    delivered
}
