//! Shared helpers for the integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flushcap_core::Sensor;
use flushcapd::forwarder::ForwarderConfig;
use flushcapd::hub::{
    spawn_hub, ConnectionError, ConnectionSink, HubHandle, HubPhase, PeerFrame, PeerStream,
};
use flushcapd::server::{Server, ServerConfig, ServerError};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound for anything a test waits on
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// In-memory connections
// ============================================================================

/// The far end of an in-memory subscriber connection.
pub struct TestPeer {
    /// Frames written by the hub.
    pub frames: mpsc::UnboundedReceiver<String>,
    /// Inbound frames for the hub's reader; drop to hang up.
    pub inbound: mpsc::UnboundedSender<Result<PeerFrame, ConnectionError>>,
}

impl TestPeer {
    /// Next frame written by the hub, or `None` once the hub closed the sink.
    pub async fn next_frame(&mut self) -> Option<String> {
        timeout(WAIT_TIMEOUT, self.frames.next())
            .await
            .expect("timed out waiting for a frame")
    }
}

pub fn connection_pair() -> (ConnectionSink, PeerStream, TestPeer) {
    let (frame_tx, frame_rx) = mpsc::unbounded::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded();
    let sink: ConnectionSink = Box::pin(frame_tx.sink_map_err(|_| ConnectionError::Closed));
    let stream: PeerStream = Box::pin(inbound_rx);
    (
        sink,
        stream,
        TestPeer {
            frames: frame_rx,
            inbound: inbound_tx,
        },
    )
}

/// Registers an in-memory subscriber with the hub.
pub async fn subscribe(hub: &HubHandle) -> TestPeer {
    let (sink, stream, peer) = connection_pair();
    hub.register_connection(sink, stream)
        .await
        .expect("register connection");
    peer
}

pub fn event(name: &str, state: &str) -> String {
    format!(r#"{{"name":"{name}","state":"{state}"}}"#)
}

// ============================================================================
// Running instances
// ============================================================================

/// A server on an ephemeral port.
pub struct TestInstance {
    pub addr: SocketAddr,
    pub hub: HubHandle,
    pub server: Arc<Server>,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl TestInstance {
    /// Registers `sensors`, then serves with `forward` as upstreams.
    pub async fn spawn(sensors: Vec<Arc<dyn Sensor>>, forward: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let hub = spawn_hub();
        for sensor in sensors {
            hub.register_sensor(sensor).await.expect("register sensor");
        }

        let config = ServerConfig {
            listen: addr.to_string(),
            canonical_url: addr.to_string(),
            forward,
            forwarder: ForwarderConfig {
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_millis(200),
                ..ForwarderConfig::default()
            },
        };
        let server = Arc::new(Server::new(config, hub.clone()));

        let serving = Arc::clone(&server);
        let task = tokio::spawn(async move { serving.serve(listener).await });

        let mut phase = hub.watch_phase();
        timeout(WAIT_TIMEOUT, phase.wait_for(|phase| *phase == HubPhase::Running))
            .await
            .expect("server did not start")
            .expect("hub stopped");

        Self {
            addr,
            hub,
            server,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect_feed(&self) -> WsClient {
        let (socket, _response) = connect_async(format!("ws://{}/changes", self.addr))
            .await
            .expect("connect to changes feed");
        WsClient { socket }
    }

    /// Terminates the server and waits for `serve` to return.
    pub async fn shutdown(self) {
        timeout(WAIT_TIMEOUT, self.server.terminate())
            .await
            .expect("terminate timed out")
            .expect("terminate");
        timeout(WAIT_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server error");
    }
}

/// A changes feed subscriber over a real socket.
pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Next text payload, or `None` once the server closed the feed.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            let message = timeout(WAIT_TIMEOUT, self.socket.next())
                .await
                .expect("timed out waiting for a message");
            match message {
                Some(Ok(Message::Text(text))) => return Some(text.as_str().to_string()),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }
}
