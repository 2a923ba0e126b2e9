//! Hub actor - owns all sensor and connection state and processes commands.
//!
//! The HubActor is the single owner of the sensor records and the subscriber
//! connections. It receives commands via an mpsc channel and writes every
//! broadcast to the connections itself, one command at a time.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::sync::Arc;

use flushcap_core::{change_handler, Sensor, SensorRecord};
use flushcap_protocol::encode_event;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::commands::{HubCommand, HubError, HubPhase};
use super::connection::{
    close_sink, read_until_closed, ConnectionId, ConnectionRegistry, ConnectionSink, PeerStream,
};

// ============================================================================
// Hub Actor
// ============================================================================

/// The hub actor - owns all sensor and connection state.
///
/// # Ownership
///
/// The actor owns:
/// - `records`: sensor records in insertion order
/// - `connections`: the open subscriber connections
/// - `phase`: the hub lifecycle, published to every handle
///
/// # Termination
///
/// When the shared terminate token fires the actor closes every connection,
/// then keeps receiving until each connection's reader has unregistered it.
/// Everything else received in that window is rejected.
pub struct HubActor {
    /// Command receiver
    receiver: mpsc::Receiver<HubCommand>,

    /// Own mailbox, handed to sensor watchers and connection readers.
    /// Weak so the actor alone never keeps the mailbox open.
    mailbox: mpsc::WeakSender<HubCommand>,

    /// Fired by the first `HubHandle::terminate` call
    terminate: CancellationToken,

    phase: watch::Sender<HubPhase>,

    records: Vec<SensorRecord>,

    connections: ConnectionRegistry,
}

impl HubActor {
    /// Creates a new hub actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `mailbox` - Weak sender of the same channel
    /// * `terminate` - Token observed to start termination
    /// * `phase` - Publisher of the lifecycle phase
    pub fn new(
        receiver: mpsc::Receiver<HubCommand>,
        mailbox: mpsc::WeakSender<HubCommand>,
        terminate: CancellationToken,
        phase: watch::Sender<HubPhase>,
    ) -> Self {
        Self {
            receiver,
            mailbox,
            terminate,
            phase,
            records: Vec::new(),
            connections: ConnectionRegistry::new(),
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until termination is requested or every sender is
    /// dropped, then drains the connections and publishes `Terminated`.
    pub async fn run(mut self) {
        info!("Hub actor starting");

        loop {
            tokio::select! {
                biased;
                _ = self.terminate.cancelled() => break,
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("All hub handles dropped");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;

        info!(sensors = self.records.len(), "Hub actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::RegisterSensor { sensor, respond_to } => {
                self.handle_register_sensor(sensor, respond_to).await;
            }
            HubCommand::SensorChanged { record } => {
                self.handle_sensor_changed(record).await;
            }
            HubCommand::RegisterConnection {
                sink,
                stream,
                respond_to,
            } => {
                self.handle_register_connection(sink, stream, respond_to)
                    .await;
            }
            HubCommand::UnregisterConnection { id } => {
                self.handle_unregister_connection(id);
            }
            HubCommand::SnapshotSensors { respond_to } => {
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(self.records.clone());
            }
            HubCommand::MarkRunning { respond_to } => {
                let result = self.handle_mark_running();
                let _ = respond_to.send(result);
            }
        }
    }

    async fn handle_register_sensor(
        &mut self,
        sensor: Arc<dyn Sensor>,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    ) {
        let name = sensor.name().to_string();

        if self.records.iter().any(|record| record.name == name) {
            debug!(sensor = %name, "Sensor already registered");
            let _ = respond_to.send(Err(HubError::AlreadyRegistered(name)));
            return;
        }

        let Some(mailbox) = self.mailbox.upgrade() else {
            let _ = respond_to.send(Err(HubError::Terminated));
            return;
        };

        let watched = name.clone();
        let handler = change_handler(move |state| {
            let mailbox = mailbox.clone();
            let record = SensorRecord::new(watched.clone(), state);
            async move {
                if mailbox
                    .send(HubCommand::SensorChanged { record })
                    .await
                    .is_err()
                {
                    debug!("Hub stopped, dropping sensor change");
                }
            }
        });

        if let Err(e) = sensor.watch(handler) {
            warn!(sensor = %name, error = %e, "Failed to watch sensor");
            let _ = respond_to.send(Err(HubError::Watch(e)));
            return;
        }

        let record = SensorRecord::new(name, sensor.state());
        info!(sensor = %record.name, state = %record.state, "Sensor registered");
        self.records.push(record.clone());
        let _ = respond_to.send(Ok(()));

        // Nobody can be subscribed before the listener runs
        if *self.phase.borrow() == HubPhase::Running {
            self.broadcast(&record).await;
        }
    }

    async fn handle_sensor_changed(&mut self, record: SensorRecord) {
        match self.records.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => existing.state.clone_from(&record.state),
            None => {
                debug!(sensor = %record.name, "Change for unknown sensor, adding record");
                self.records.push(record.clone());
            }
        }

        debug!(sensor = %record.name, state = %record.state, "Sensor changed");
        self.broadcast(&record).await;
    }

    async fn handle_register_connection(
        &mut self,
        mut sink: ConnectionSink,
        stream: PeerStream,
        respond_to: oneshot::Sender<Result<ConnectionId, HubError>>,
    ) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            if let Err(e) = close_sink(&mut sink).await {
                debug!(error = %e, "Failed to close rejected connection");
            }
            let _ = respond_to.send(Err(HubError::Terminated));
            return;
        };

        let (id, reader_cancel) = self.connections.insert(sink);
        info!(connection_id = %id, connections = self.connections.len(), "Connection registered");

        let replay = self.records.iter().filter_map(encode_logged).collect();
        self.connections.send_all(id, replay).await;

        tokio::spawn(read_until_closed(id, stream, reader_cancel, mailbox));

        let _ = respond_to.send(Ok(id));
    }

    fn handle_unregister_connection(&mut self, id: ConnectionId) {
        if self.connections.remove(id) {
            info!(connection_id = %id, connections = self.connections.len(), "Connection unregistered");
        } else {
            debug!(connection_id = %id, "Connection already unregistered");
        }
    }

    fn handle_mark_running(&mut self) -> Result<(), HubError> {
        if *self.phase.borrow() != HubPhase::NotRunning {
            return Err(HubError::AlreadyRunning);
        }
        self.set_phase(HubPhase::Running);
        info!("Hub running");
        Ok(())
    }

    async fn broadcast(&mut self, record: &SensorRecord) {
        let Some(payload) = encode_logged(record) else {
            return;
        };
        let delivered = self.connections.broadcast(&payload).await;
        debug!(
            sensor = %record.name,
            delivered,
            connections = self.connections.len(),
            "Broadcast sensor state"
        );
    }

    fn set_phase(&self, phase: HubPhase) {
        self.phase.send_replace(phase);
    }

    // ========================================================================
    // Termination
    // ========================================================================

    async fn shutdown(&mut self) {
        self.set_phase(HubPhase::Terminating);
        info!(connections = self.connections.len(), "Hub terminating");

        self.connections.close_all().await;

        while !self.connections.is_empty() {
            match self.receiver.recv().await {
                Some(HubCommand::UnregisterConnection { id }) => {
                    self.handle_unregister_connection(id);
                }
                Some(cmd) => self.reject(cmd, HubError::Terminating).await,
                None => break,
            }
        }

        self.set_phase(HubPhase::Terminated);

        // Answer whatever was queued behind the drain
        self.receiver.close();
        while let Ok(cmd) = self.receiver.try_recv() {
            self.reject(cmd, HubError::Terminated).await;
        }

        info!("Hub terminated");
    }

    async fn reject(&mut self, cmd: HubCommand, error: HubError) {
        match cmd {
            HubCommand::RegisterSensor { sensor, respond_to } => {
                debug!(sensor = %sensor.name(), "Rejecting sensor registration");
                let _ = respond_to.send(Err(error));
            }
            HubCommand::SensorChanged { record } => {
                debug!(sensor = %record.name, "Dropping sensor change");
            }
            HubCommand::RegisterConnection {
                mut sink,
                respond_to,
                ..
            } => {
                if let Err(e) = close_sink(&mut sink).await {
                    debug!(error = %e, "Failed to close rejected connection");
                }
                let _ = respond_to.send(Err(error));
            }
            HubCommand::UnregisterConnection { id } => {
                self.handle_unregister_connection(id);
            }
            HubCommand::SnapshotSensors { respond_to } => {
                // Dropping the responder reports the hub as unavailable
                drop(respond_to);
            }
            HubCommand::MarkRunning { respond_to } => {
                let _ = respond_to.send(Err(error));
            }
        }
    }

    /// Number of sensor records.
    pub fn sensor_count(&self) -> usize {
        self.records.len()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

fn encode_logged(record: &SensorRecord) -> Option<String> {
    match encode_event(record) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(sensor = %record.name, error = %e, "Failed to encode sensor event");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connection::test_support::{connection_pair, TestPeer};
    use crate::hub::connection::PeerFrame;
    use flushcap_core::SensorError;
    use flushcap_sensors::ManualSensor;
    use futures::StreamExt;

    fn create_actor() -> (mpsc::Sender<HubCommand>, HubActor, watch::Receiver<HubPhase>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (phase_tx, phase_rx) = watch::channel(HubPhase::NotRunning);
        let actor = HubActor::new(cmd_rx, cmd_tx.downgrade(), CancellationToken::new(), phase_tx);
        (cmd_tx, actor, phase_rx)
    }

    async fn register(actor: &mut HubActor, sensor: Arc<dyn Sensor>) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        actor
            .handle_command(HubCommand::RegisterSensor {
                sensor,
                respond_to: tx,
            })
            .await;
        rx.await.unwrap()
    }

    async fn connect(actor: &mut HubActor) -> (ConnectionId, TestPeer) {
        let (sink, stream, peer) = connection_pair();
        let (tx, rx) = oneshot::channel();
        actor
            .handle_command(HubCommand::RegisterConnection {
                sink,
                stream,
                respond_to: tx,
            })
            .await;
        (rx.await.unwrap().unwrap(), peer)
    }

    async fn snapshot(actor: &mut HubActor) -> Vec<SensorRecord> {
        let (tx, rx) = oneshot::channel();
        actor
            .handle_command(HubCommand::SnapshotSensors { respond_to: tx })
            .await;
        rx.await.unwrap()
    }

    async fn mark_running(actor: &mut HubActor) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        actor
            .handle_command(HubCommand::MarkRunning { respond_to: tx })
            .await;
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_register_sensor() {
        let (_tx, mut actor, _phase) = create_actor();
        let sensor = Arc::new(ManualSensor::new("L", "unlocked"));

        register(&mut actor, sensor.clone()).await.unwrap();

        assert!(sensor.is_watched());
        assert_eq!(snapshot(&mut actor).await, vec![SensorRecord::new("L", "unlocked")]);
    }

    #[tokio::test]
    async fn test_register_duplicate_fails() {
        let (_tx, mut actor, _phase) = create_actor();
        let first = Arc::new(ManualSensor::new("L", "unlocked"));
        let second = Arc::new(ManualSensor::new("L", "locked"));

        register(&mut actor, first).await.unwrap();
        let result = register(&mut actor, second.clone()).await;

        assert_eq!(result, Err(HubError::AlreadyRegistered("L".to_string())));
        assert!(!second.is_watched());
        assert_eq!(actor.sensor_count(), 1);
        assert_eq!(snapshot(&mut actor).await[0].state, "unlocked");
    }

    #[tokio::test]
    async fn test_register_sensor_watch_refused() {
        let (_tx, mut actor, _phase) = create_actor();
        let sensor = Arc::new(ManualSensor::new("R", "locked"));
        sensor
            .watch(change_handler(|_| async {}))
            .unwrap();

        let result = register(&mut actor, sensor).await;

        assert_eq!(
            result,
            Err(HubError::Watch(SensorError::WatcherRegistered {
                name: "R".to_string()
            }))
        );
        assert_eq!(actor.sensor_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_preserves_insertion_order() {
        let (_tx, mut actor, _phase) = create_actor();
        for name in ["R", "L", "M"] {
            register(&mut actor, Arc::new(ManualSensor::new(name, "unlocked")))
                .await
                .unwrap();
        }

        let names: Vec<_> = snapshot(&mut actor)
            .await
            .into_iter()
            .map(|record| record.name)
            .collect();
        assert_eq!(names, vec!["R", "L", "M"]);
    }

    #[tokio::test]
    async fn test_sensor_change_reaches_mailbox() {
        let (_tx, mut actor, _phase) = create_actor();
        let sensor = Arc::new(ManualSensor::new("L", "unlocked"));
        register(&mut actor, sensor.clone()).await.unwrap();

        sensor.set_state("locked").await.unwrap();

        let cmd = actor.receiver.recv().await.unwrap();
        match cmd {
            HubCommand::SensorChanged { record } => {
                assert_eq!(record, SensorRecord::new("L", "locked"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sensor_changed_for_unknown_name_inserts() {
        let (_tx, mut actor, _phase) = create_actor();

        actor
            .handle_command(HubCommand::SensorChanged {
                record: SensorRecord::new("upstream", "locked"),
            })
            .await;

        assert_eq!(
            snapshot(&mut actor).await,
            vec![SensorRecord::new("upstream", "locked")]
        );
    }

    #[tokio::test]
    async fn test_connection_receives_replay_then_changes() {
        let (_tx, mut actor, _phase) = create_actor();
        register(&mut actor, Arc::new(ManualSensor::new("L", "unlocked")))
            .await
            .unwrap();
        register(&mut actor, Arc::new(ManualSensor::new("R", "locked")))
            .await
            .unwrap();
        mark_running(&mut actor).await.unwrap();

        let (_id, mut peer) = connect(&mut actor).await;
        assert_eq!(
            peer.frames.next().await.unwrap(),
            r#"{"name":"L","state":"unlocked"}"#
        );
        assert_eq!(
            peer.frames.next().await.unwrap(),
            r#"{"name":"R","state":"locked"}"#
        );

        // Unchanged states are broadcast too
        for _ in 0..2 {
            actor
                .handle_command(HubCommand::SensorChanged {
                    record: SensorRecord::new("R", "locked"),
                })
                .await;
            assert_eq!(
                peer.frames.next().await.unwrap(),
                r#"{"name":"R","state":"locked"}"#
            );
        }
    }

    #[tokio::test]
    async fn test_registration_broadcast_only_when_running() {
        let (_tx, mut actor, phase) = create_actor();
        let (_id, mut peer) = connect(&mut actor).await;

        register(&mut actor, Arc::new(ManualSensor::new("L", "unlocked")))
            .await
            .unwrap();
        assert!(peer.frames.try_next().is_err(), "no broadcast before running");

        mark_running(&mut actor).await.unwrap();
        assert_eq!(*phase.borrow(), HubPhase::Running);

        register(&mut actor, Arc::new(ManualSensor::new("R", "locked")))
            .await
            .unwrap();
        assert_eq!(
            peer.frames.next().await.unwrap(),
            r#"{"name":"R","state":"locked"}"#
        );
    }

    #[tokio::test]
    async fn test_mark_running_twice_fails() {
        let (_tx, mut actor, _phase) = create_actor();
        mark_running(&mut actor).await.unwrap();
        assert_eq!(mark_running(&mut actor).await, Err(HubError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_reader_unregisters_closed_connection() {
        let (_tx, mut actor, _phase) = create_actor();
        let (id, peer) = connect(&mut actor).await;
        assert_eq!(actor.connection_count(), 1);

        peer.inbound.unbounded_send(Ok(PeerFrame::Close)).unwrap();

        let cmd = actor.receiver.recv().await.unwrap();
        assert!(matches!(cmd, HubCommand::UnregisterConnection { id: got } if got == id));
        actor.handle_command(cmd).await;
        assert_eq!(actor.connection_count(), 0);

        // A second unregister is a no-op
        actor
            .handle_command(HubCommand::UnregisterConnection { id })
            .await;
        assert_eq!(actor.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_connections_on_terminate() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (phase_tx, mut phase_rx) = watch::channel(HubPhase::NotRunning);
        let terminate = CancellationToken::new();
        let actor = HubActor::new(cmd_rx, cmd_tx.downgrade(), terminate.clone(), phase_tx);
        let task = tokio::spawn(actor.run());

        let (sink, stream, mut peer) = connection_pair();
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(HubCommand::RegisterConnection {
                sink,
                stream,
                respond_to: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        terminate.cancel();
        phase_rx
            .wait_for(|phase| *phase == HubPhase::Terminated)
            .await
            .unwrap();
        task.await.unwrap();

        // The hub closed the subscriber's stream
        assert_eq!(peer.frames.next().await, None);

        let (tx, rx) = oneshot::channel();
        let sent = cmd_tx
            .send(HubCommand::MarkRunning { respond_to: tx })
            .await;
        assert!(sent.is_err());
        drop(rx);
    }
}
