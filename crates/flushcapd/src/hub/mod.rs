//! Sensor hub using Actor pattern.
//!
//! The hub is the single owner of the sensor records and the subscriber
//! connections. It receives commands via a tokio mpsc channel and writes
//! every change to every subscriber in the order it processed them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Sensors /       │────▶│    HubActor     │────▶│  Subscriber     │
//! │ Forwarders      │     └─────────────────┘     │  connections    │
//! └─────────────────┘             ▲               └─────────────────┘
//!         │   HubCommand          │                       │
//!         │   (mpsc channel)      │ UnregisterConnection  │
//!         ▼                       └───────────────────────┘
//!    SensorChanged                      reader tasks
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

mod actor;
mod commands;
mod connection;
mod handle;

pub use actor::HubActor;
pub use commands::{Delivery, HubCommand, HubError, HubPhase};
pub use connection::{
    ConnectionError, ConnectionId, ConnectionSink, PeerFrame, PeerStream, WRITE_TIMEOUT,
};
pub use handle::HubHandle;

use handle::Lifecycle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawn the hub actor and return a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use flushcapd::hub::spawn_hub;
///
/// #[tokio::main]
/// async fn main() {
///     let hub = spawn_hub();
///     let sensors = hub.snapshot_sensors().await;
/// }
/// ```
pub fn spawn_hub() -> HubHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (phase_tx, phase_rx) = watch::channel(HubPhase::NotRunning);
    let lifecycle = Arc::new(Lifecycle::default());

    let actor = HubActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        lifecycle.terminate.clone(),
        phase_tx,
    );
    tokio::spawn(actor.run());

    HubHandle::new(cmd_tx, lifecycle, phase_rx)
}
