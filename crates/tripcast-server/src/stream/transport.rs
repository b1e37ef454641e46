//! Write side of one SSE response.
//!
//! [`Transport`] is the narrow surface a stream session needs from the HTTP
//! layer. [`ChannelTransport`] is the production implementation: a bounded
//! `mpsc` channel whose receiver becomes the response body, so a write never
//! blocks and a dropped body shows up as a closed channel.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tripcast_core::TransportError;

/// A writable, one-way text channel to a single subscriber.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queue one text chunk without waiting.
    fn write(&self, chunk: &str) -> Result<(), TransportError>;

    /// Whether [`end`](Self::end) has been called.
    fn is_ended(&self) -> bool;

    /// Whether the reading side is gone.
    fn is_destroyed(&self) -> bool;

    /// Finish the stream. Idempotent.
    fn end(&self);

    /// Resolves once the transport is ended or destroyed.
    async fn closed(&self);
}

/// Channel-backed transport feeding an HTTP response body.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<String>,
    ended: CancellationToken,
}

/// Reading half of a [`ChannelTransport`].
#[derive(Debug)]
pub struct TransportBody {
    rx: mpsc::Receiver<String>,
    ended: CancellationToken,
}

impl ChannelTransport {
    /// Create a transport with room for `capacity` queued frames (minimum 1).
    pub fn new(capacity: usize) -> (Self, TransportBody) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let ended = CancellationToken::new();
        (
            Self {
                tx,
                ended: ended.clone(),
            },
            TransportBody { rx, ended },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn write(&self, chunk: &str) -> Result<(), TransportError> {
        if self.ended.is_cancelled() {
            return Err(TransportError::Ended);
        }
        match self.tx.try_send(chunk.to_owned()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::Full),
            Err(TrySendError::Closed(_)) => Err(TransportError::Destroyed),
        }
    }

    fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    fn is_destroyed(&self) -> bool {
        self.tx.is_closed()
    }

    fn end(&self) {
        self.ended.cancel();
    }

    async fn closed(&self) {
        tokio::select! {
            () = self.tx.closed() => {}
            () = self.ended.cancelled() => {}
        }
    }
}

impl TransportBody {
    /// Frames in write order; the stream finishes as soon as the transport
    /// is ended, discarding anything still queued.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        ReceiverStream::new(self.rx).take_until(self.ended.cancelled_owned())
    }
}
