//! One live connection to an upstream changes feed.
//!
//! A link runs two tasks over the split WebSocket: a reader that decodes
//! events and hands them to the hub, and a keepalive that pings the
//! upstream and sends the close frame when the forwarder is stopped.
//! Whichever task ends first cancels the other.

use std::time::Duration;

use flushcap_protocol::decode_event;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::hub::{Delivery, HubHandle, WRITE_TIMEOUT};

pub(super) type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reason sent with the close frame on stop.
pub const CLOSE_REASON: &str = "KTHXBYE";

/// Keepalive timing of a link.
#[derive(Debug, Clone, Copy)]
pub(super) struct Keepalive {
    pub ping_period: Duration,
    pub pong_timeout: Duration,
}

/// The running tasks of one upstream connection.
pub(super) struct Link {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl Link {
    /// Splits the socket and spawns the reader and keepalive tasks.
    ///
    /// `stop` is the forwarder's stop token; the link's own token is a
    /// child of it.
    pub fn spawn(
        socket: UpstreamSocket,
        address: String,
        hub: HubHandle,
        stop: &CancellationToken,
        keepalive: Keepalive,
    ) -> Self {
        let cancel = stop.child_token();
        let (sink, stream) = socket.split();

        let reader = tokio::spawn(read_events(
            stream,
            address.clone(),
            hub,
            cancel.clone(),
            keepalive.pong_timeout,
        ));
        let keepalive = tokio::spawn(keep_alive(
            sink,
            address,
            stop.clone(),
            cancel.clone(),
            keepalive.ping_period,
        ));

        Self {
            cancel,
            reader,
            keepalive,
        }
    }

    /// Resolves once either task has ended (or the forwarder was stopped).
    pub async fn finished(&self) {
        self.cancel.cancelled().await;
    }

    /// Cancels both tasks and waits for them to exit.
    pub async fn join(self) {
        self.cancel.cancel();
        if let Err(e) = self.reader.await {
            warn!(error = %e, "Forwarder reader task failed");
        }
        if let Err(e) = self.keepalive.await {
            warn!(error = %e, "Forwarder keepalive task failed");
        }
    }
}

async fn read_events(
    mut stream: SplitStream<UpstreamSocket>,
    address: String,
    hub: HubHandle,
    cancel: CancellationToken,
    pong_timeout: Duration,
) {
    let mut deadline = Instant::now() + pong_timeout;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(address = %address, "Upstream missed its pong deadline, dropping connection");
                break;
            }
            Ok(None) => {
                debug!(address = %address, "Upstream stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                error!(address = %address, error = %e, "Failed to read from upstream");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let event = match decode_event(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(address = %address, error = %e, payload = %text.as_str(), "Dropping undecodable event");
                        continue;
                    }
                };
                debug!(address = %address, sensor = %event.name, state = %event.state, "Forwarding event");
                match hub.forward_change(event, &cancel).await {
                    Ok(Delivery::Accepted) => {}
                    Ok(Delivery::Stopped) => return,
                    Err(e) => {
                        warn!(address = %address, error = %e, "Hub unavailable, dropping connection");
                        break;
                    }
                }
            }
            Message::Pong(_) => {
                deadline = Instant::now() + pong_timeout;
            }
            Message::Close(frame) => {
                debug!(address = %address, frame = ?frame, "Upstream closed the connection");
                break;
            }
            Message::Ping(_) => {}
            Message::Binary(_) | Message::Frame(_) => {
                warn!(address = %address, "Text message expected, dropping frame");
            }
        }
    }

    cancel.cancel();
}

async fn keep_alive(
    mut sink: SplitSink<UpstreamSocket, Message>,
    address: String,
    stop: CancellationToken,
    cancel: CancellationToken,
    ping_period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                send_close(&mut sink, &address).await;
                break;
            }
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Default::default()))).await {
                    Ok(Ok(())) => debug!(address = %address, "Sent ping"),
                    Ok(Err(e)) => {
                        error!(address = %address, error = %e, "Failed to send ping");
                        break;
                    }
                    Err(_) => {
                        error!(address = %address, "Timed out sending ping");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
}

async fn send_close(sink: &mut SplitSink<UpstreamSocket, Message>, address: &str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: CLOSE_REASON.into(),
    };
    match timeout(WRITE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => debug!(address = %address, "Sent close frame"),
        Ok(Err(e)) => warn!(address = %address, error = %e, "Failed to close the connection cleanly"),
        Err(_) => warn!(address = %address, "Timed out closing the connection"),
    }
}
