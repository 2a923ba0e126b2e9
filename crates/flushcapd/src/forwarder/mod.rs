//! Forwarders: subscribe to another instance's changes feed and re-publish
//! every event into the local hub.
//!
//! Each forwarder runs its own reconnect loop:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Disconnected (link lost)
//!       ▲              │                │
//!       └── backoff ◀──┘ (failure)      └──▶ Closing ──▶ Terminated (stop)
//! ```
//!
//! Handshake failures double the backoff up to a cap; a successful
//! connection resets it. A lost connection is retried immediately.

mod backoff;
mod link;

pub use backoff::{Backoff, INITIAL_BACKOFF, MAX_BACKOFF};
pub use link::CLOSE_REASON;

use std::fmt;
use std::time::Duration;

use flushcap_protocol::changes_feed_url;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::hub::HubHandle;
use link::{Keepalive, Link, UpstreamSocket};

/// Send a ping every minute
pub const PING_PERIOD: Duration = Duration::from_secs(60);

/// Read deadline, refreshed by every pong (11/10 of the ping period)
pub const PONG_TIMEOUT: Duration = Duration::from_secs(66);

/// Errors of a single connection attempt.
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("failed to connect: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connection phase of a forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderPhase {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Terminated,
}

impl fmt::Display for ForwarderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Snapshot of a forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderState {
    /// Normalised changes feed URL.
    pub address: String,
    pub phase: ForwarderPhase,
    /// Handshake timeout of the next attempt and wait before it.
    pub backoff: Duration,
}

/// Timing of a forwarder.
#[derive(Debug, Clone, Copy)]
pub struct ForwarderConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub ping_period: Duration,
    pub pong_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            ping_period: PING_PERIOD,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

/// Handle of a running forwarder.
pub struct Forwarder {
    stop: CancellationToken,
    state: watch::Receiver<ForwarderState>,
}

impl Forwarder {
    /// Starts forwarding `address` into `hub` with the default timing.
    ///
    /// `address` may be `host:port` or a `ws`/`wss`/`http`/`https` URL.
    pub fn start(address: &str, hub: HubHandle) -> Self {
        Self::with_config(address, hub, ForwarderConfig::default())
    }

    pub fn with_config(address: &str, hub: HubHandle, config: ForwarderConfig) -> Self {
        let url = changes_feed_url(address);
        let backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        let (state_tx, state_rx) = watch::channel(ForwarderState {
            address: url.clone(),
            phase: ForwarderPhase::Disconnected,
            backoff: backoff.current(),
        });
        let stop = CancellationToken::new();

        let task = ReconnectLoop {
            url,
            hub,
            stop: stop.clone(),
            state: state_tx,
            backoff,
            keepalive: Keepalive {
                ping_period: config.ping_period,
                pong_timeout: config.pong_timeout,
            },
        };
        tokio::spawn(task.run());

        Self {
            stop,
            state: state_rx,
        }
    }

    /// Requests shutdown. Returns immediately; await [`Forwarder::drained`].
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Resolves once the reconnect loop and both connection tasks exited.
    pub async fn drained(&self) {
        let mut state = self.state.clone();
        if state
            .wait_for(|state| state.phase == ForwarderPhase::Terminated)
            .await
            .is_err()
        {
            debug!("Forwarder task exited without publishing its final state");
        }
    }

    pub fn state(&self) -> ForwarderState {
        self.state.borrow().clone()
    }

    /// Receiver of state updates.
    pub fn watch_state(&self) -> watch::Receiver<ForwarderState> {
        self.state.clone()
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct ReconnectLoop {
    url: String,
    hub: HubHandle,
    stop: CancellationToken,
    state: watch::Sender<ForwarderState>,
    backoff: Backoff,
    keepalive: Keepalive,
}

impl ReconnectLoop {
    async fn run(mut self) {
        info!(address = %self.url, "Forwarder starting");

        while !self.stop.is_cancelled() {
            self.publish(ForwarderPhase::Connecting);
            let handshake_timeout = self.backoff.current();
            info!(
                address = %self.url,
                timeout_ms = handshake_timeout.as_millis() as u64,
                "Connecting to upstream changes feed"
            );

            let attempt = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                attempt = self.connect(handshake_timeout) => attempt,
            };

            match attempt {
                Ok(socket) => {
                    self.backoff.reset();
                    self.publish(ForwarderPhase::Connected);
                    info!(address = %self.url, "Connected to upstream changes feed");

                    let link = Link::spawn(
                        socket,
                        self.url.clone(),
                        self.hub.clone(),
                        &self.stop,
                        self.keepalive,
                    );
                    link.finished().await;

                    if self.stop.is_cancelled() {
                        self.publish(ForwarderPhase::Closing);
                        link.join().await;
                        break;
                    }

                    link.join().await;
                    self.publish(ForwarderPhase::Disconnected);
                    info!(address = %self.url, "Upstream connection lost, reconnecting");
                }
                Err(e) => {
                    let wait = self.backoff.on_failure();
                    self.publish(ForwarderPhase::Disconnected);
                    error!(
                        address = %self.url,
                        error = %e,
                        backoff_ms = wait.as_millis() as u64,
                        "Failed to connect to upstream changes feed"
                    );

                    tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => break,
                        _ = sleep(wait) => {}
                    }
                }
            }
        }

        self.publish(ForwarderPhase::Terminated);
        info!(address = %self.url, "Forwarder stopped");
    }

    async fn connect(&self, handshake_timeout: Duration) -> Result<UpstreamSocket, ForwarderError> {
        match timeout(handshake_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => Err(ForwarderError::Connect(e)),
            Err(_) => Err(ForwarderError::HandshakeTimeout(handshake_timeout)),
        }
    }

    fn publish(&self, phase: ForwarderPhase) {
        let backoff = self.backoff.current();
        self.state.send_modify(|state| {
            state.phase = phase;
            state.backoff = backoff;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::spawn_hub;

    fn fast_config() -> ForwarderConfig {
        ForwarderConfig {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(80),
            ..ForwarderConfig::default()
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ForwarderPhase::Connecting.to_string(), "connecting");
        assert_eq!(ForwarderPhase::Terminated.to_string(), "terminated");
    }

    #[tokio::test]
    async fn test_address_is_normalised() {
        let hub = spawn_hub();
        let forwarder = Forwarder::with_config("127.0.0.1:9", hub, fast_config());
        assert_eq!(forwarder.state().address, "ws://127.0.0.1:9/changes");
        forwarder.stop();
        forwarder.drained().await;
    }

    #[tokio::test]
    async fn test_unreachable_upstream_backs_off_until_cap() {
        // Bind and drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let hub = spawn_hub();
        let forwarder = Forwarder::with_config(&addr.to_string(), hub, fast_config());
        let mut state = forwarder.watch_state();

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| state.backoff == Duration::from_millis(80)),
        )
        .await
        .expect("backoff should reach its cap")
        .unwrap();

        forwarder.stop();
        tokio::time::timeout(Duration::from_secs(5), forwarder.drained())
            .await
            .expect("forwarder should drain");
        assert_eq!(forwarder.state().phase, ForwarderPhase::Terminated);
    }
}
