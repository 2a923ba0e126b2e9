//! Connection registry and the per-connection reader task.
//!
//! A subscriber connection is a pair of halves: a [`ConnectionSink`] the hub
//! writes encoded events to, and a [`PeerStream`] a reader task watches for
//! closure. The gateway adapts WebSockets into this pair; tests use
//! in-memory channels.
//!
//! The registry is owned by the hub actor. Delivery failures are logged and
//! leave the entry in place; only the reader task removes a connection, by
//! sending `UnregisterConnection` through the hub's mailbox.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::commands::HubCommand;

/// Write timeout for a single frame (10 seconds)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound half of a subscriber connection. Items are text frame payloads.
pub type ConnectionSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;

/// Inbound half of a subscriber connection.
pub type PeerStream = Pin<Box<dyn Stream<Item = Result<PeerFrame, ConnectionError>> + Send>>;

/// What the peer sent, as far as the reader task cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerFrame {
    /// Text or binary payload; ignored.
    Data,
    /// Ping or pong; answered by the transport.
    Control,
    /// The peer started the close handshake.
    Close,
}

/// Identifier of a registered connection, unique within one hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors on a subscriber connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    pub fn transport<E: fmt::Display>(err: E) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Writes one frame, bounded by [`WRITE_TIMEOUT`].
async fn write_frame(sink: &mut ConnectionSink, payload: String) -> Result<(), ConnectionError> {
    match timeout(WRITE_TIMEOUT, sink.send(payload)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::WriteTimeout(WRITE_TIMEOUT)),
    }
}

/// Starts the close handshake on a sink, bounded by [`WRITE_TIMEOUT`].
pub async fn close_sink(sink: &mut ConnectionSink) -> Result<(), ConnectionError> {
    match timeout(WRITE_TIMEOUT, sink.close()).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::WriteTimeout(WRITE_TIMEOUT)),
    }
}

struct ConnectionEntry {
    id: ConnectionId,
    sink: ConnectionSink,
    reader_cancel: CancellationToken,
}

/// The set of open subscriber connections, in registration order.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: u64,
    entries: Vec<ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection, returning its id and the token that stops its reader.
    pub fn insert(&mut self, sink: ConnectionSink) -> (ConnectionId, CancellationToken) {
        self.next_id = self.next_id.wrapping_add(1);
        let id = ConnectionId(self.next_id);
        let reader_cancel = CancellationToken::new();
        self.entries.push(ConnectionEntry {
            id,
            sink,
            reader_cancel: reader_cancel.clone(),
        });
        (id, reader_cancel)
    }

    /// Removes a connection. Returns false when it was not registered.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Sends frames to one connection in order, stopping at the first failure.
    pub async fn send_all(&mut self, id: ConnectionId, payloads: Vec<String>) {
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) else {
            return;
        };
        for payload in payloads {
            if let Err(e) = write_frame(&mut entry.sink, payload).await {
                warn!(connection_id = %id, error = %e, "Failed to replay state to connection");
                return;
            }
        }
    }

    /// Sends one frame to every connection. Returns how many writes succeeded.
    pub async fn broadcast(&mut self, payload: &str) -> usize {
        let mut delivered = 0;
        for entry in &mut self.entries {
            match write_frame(&mut entry.sink, payload.to_string()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // The reader task notices the broken stream and unregisters it
                    warn!(connection_id = %entry.id, error = %e, "Failed to send event to connection");
                }
            }
        }
        delivered
    }

    /// Closes every sink and cancels every reader.
    ///
    /// Entries stay registered until their readers report back.
    pub async fn close_all(&mut self) {
        for entry in &mut self.entries {
            if let Err(e) = close_sink(&mut entry.sink).await {
                debug!(connection_id = %entry.id, error = %e, "Failed to close connection cleanly");
            }
            entry.reader_cancel.cancel();
        }
    }
}

/// Reader task of one connection.
///
/// Consumes inbound frames until the peer closes, the stream fails, or the
/// hub cancels the reader, then reports the connection as gone.
pub async fn read_until_closed(
    id: ConnectionId,
    mut stream: PeerStream,
    cancel: CancellationToken,
    mailbox: mpsc::Sender<HubCommand>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(connection_id = %id, "Reader cancelled by hub");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(PeerFrame::Close)) => {
                    debug!(connection_id = %id, "Peer closed connection");
                    break;
                }
                Some(Ok(PeerFrame::Data | PeerFrame::Control)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "Connection read failed");
                    break;
                }
                None => {
                    debug!(connection_id = %id, "Connection stream ended");
                    break;
                }
            }
        }
    }

    if mailbox
        .send(HubCommand::UnregisterConnection { id })
        .await
        .is_err()
    {
        debug!(connection_id = %id, "Hub stopped before connection was unregistered");
    }
}
