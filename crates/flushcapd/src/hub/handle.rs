//! Client interface for interacting with the HubActor.
//!
//! The `HubHandle` provides a cheap-to-clone interface for sending commands
//! to the hub actor and for requesting termination.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `HubError::Terminating` / `HubError::Terminated`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flushcap_core::{Sensor, SensorRecord};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::commands::{Delivery, HubCommand, HubError, HubPhase};
use super::connection::{close_sink, ConnectionId, ConnectionSink, PeerStream};

/// Termination state shared by every handle and the actor.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    /// Set by the first `terminate` call.
    requested: AtomicBool,
    /// Cancelled together with `requested`; observed by the actor.
    pub(crate) terminate: CancellationToken,
}

// ============================================================================
// Hub Handle
// ============================================================================

/// Handle for interacting with the hub actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// Once `terminate` has been called every request is rejected up front,
/// without touching the mailbox.
///
/// # Usage
///
/// ```ignore
/// let hub = spawn_hub();
/// hub.register_sensor(sensor).await?;
/// hub.mark_running().await?;
/// let sensors = hub.snapshot_sensors().await?;
/// hub.terminate().await?;
/// ```
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    lifecycle: Arc<Lifecycle>,
    phase: watch::Receiver<HubPhase>,
}

impl HubHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<HubCommand>,
        lifecycle: Arc<Lifecycle>,
        phase: watch::Receiver<HubPhase>,
    ) -> Self {
        Self {
            sender,
            lifecycle,
            phase,
        }
    }

    /// Register a sensor and start watching it.
    ///
    /// # Errors
    ///
    /// - `HubError::AlreadyRegistered` if a sensor with this name exists
    /// - `HubError::Watch` if the sensor refused the watcher
    /// - `HubError::Terminating` / `HubError::Terminated` after `terminate`
    pub async fn register_sensor(&self, sensor: Arc<dyn Sensor>) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::RegisterSensor {
            sensor,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Report a new sensor state. Returns once the mailbox accepted it.
    ///
    /// # Errors
    ///
    /// - `HubError::Terminating` / `HubError::Terminated` after `terminate`
    pub async fn sensor_changed(&self, record: SensorRecord) -> Result<(), HubError> {
        self.send(HubCommand::SensorChanged { record }).await
    }

    /// Hand a change over on behalf of a stoppable task.
    ///
    /// Waits until the hub accepts the change or `stop` fires, whichever
    /// happens first, so a forwarder being stopped never blocks on a full
    /// mailbox.
    ///
    /// # Errors
    ///
    /// - `HubError::Terminating` / `HubError::Terminated` after `terminate`
    pub async fn forward_change(
        &self,
        record: SensorRecord,
        stop: &CancellationToken,
    ) -> Result<Delivery, HubError> {
        self.check_open()?;
        tokio::select! {
            biased;
            _ = stop.cancelled() => Ok(Delivery::Stopped),
            _ = self.lifecycle.terminate.cancelled() => Err(self.closed_error()),
            result = self.sender.send(HubCommand::SensorChanged { record }) => result
                .map(|()| Delivery::Accepted)
                .map_err(|_| HubError::Terminated),
        }
    }

    /// Add a subscriber connection.
    ///
    /// The subscriber first receives every known record, then all later
    /// broadcasts. When the hub refuses the connection its sink is closed.
    ///
    /// # Errors
    ///
    /// - `HubError::Terminating` / `HubError::Terminated` after `terminate`
    pub async fn register_connection(
        &self,
        mut sink: ConnectionSink,
        stream: PeerStream,
    ) -> Result<ConnectionId, HubError> {
        if let Err(e) = self.check_open() {
            if let Err(close_err) = close_sink(&mut sink).await {
                debug!(error = %close_err, "Failed to close rejected connection");
            }
            return Err(e);
        }

        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::RegisterConnection {
            sink,
            stream,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Get all sensor records in insertion order.
    ///
    /// Returns early with the termination condition when `terminate` is
    /// called while the request is pending.
    ///
    /// # Errors
    ///
    /// - `HubError::Terminating` / `HubError::Terminated` after `terminate`
    pub async fn snapshot_sensors(&self) -> Result<Vec<SensorRecord>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::SnapshotSensors { respond_to: tx }).await?;
        tokio::select! {
            biased;
            _ = self.lifecycle.terminate.cancelled() => Err(self.closed_error()),
            result = rx => result.map_err(|_| self.closed_error()),
        }
    }

    /// Mark the hub running: new registrations are broadcast from now on.
    ///
    /// # Errors
    ///
    /// - `HubError::AlreadyRunning` on the second call
    /// - `HubError::Terminating` / `HubError::Terminated` after `terminate`
    pub async fn mark_running(&self) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::MarkRunning { respond_to: tx }).await?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Terminate the hub.
    ///
    /// Closes every connection, waits until each connection's reader has
    /// acknowledged the closure and returns once the hub is terminated.
    ///
    /// # Errors
    ///
    /// Only the first call terminates. Later calls return
    /// `HubError::Terminating` while the first one is still draining and
    /// `HubError::Terminated` afterwards.
    pub async fn terminate(&self) -> Result<(), HubError> {
        if self.lifecycle.requested.swap(true, Ordering::SeqCst) {
            return Err(self.closed_error());
        }

        info!("Hub termination requested");
        self.lifecycle.terminate.cancel();

        let mut phase = self.phase.clone();
        if phase
            .wait_for(|phase| *phase == HubPhase::Terminated)
            .await
            .is_err()
        {
            // The actor only drops the phase sender when it exits
            debug!("Hub actor exited without publishing the terminated phase");
        }
        Ok(())
    }

    /// Returns true once `terminate` has been called.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.lifecycle.requested.load(Ordering::SeqCst)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> HubPhase {
        *self.phase.borrow()
    }

    /// Receiver of phase updates.
    pub fn watch_phase(&self) -> watch::Receiver<HubPhase> {
        self.phase.clone()
    }

    fn check_open(&self) -> Result<(), HubError> {
        if self.is_terminating() || self.lifecycle.terminate.is_cancelled() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn closed_error(&self) -> HubError {
        if self.phase() == HubPhase::Terminated {
            HubError::Terminated
        } else {
            HubError::Terminating
        }
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.check_open()?;
        tokio::select! {
            biased;
            _ = self.lifecycle.terminate.cancelled() => Err(self.closed_error()),
            result = self.sender.send(command) => result.map_err(|_| HubError::Terminated),
        }
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("phase", &self.phase())
            .field("terminating", &self.is_terminating())
            .finish_non_exhaustive()
    }
}
