//! Hub commands, errors and lifecycle phases.
//!
//! This module defines the message types for communicating with the `HubActor`:
//! - `HubCommand`: Commands sent to the actor
//! - `HubError`: Errors that can occur during hub operations
//! - `HubPhase`: Lifecycle of the hub as a whole
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::fmt;
use std::sync::Arc;

use flushcap_core::{Sensor, SensorError, SensorRecord};
use thiserror::Error;
use tokio::sync::oneshot;

use super::connection::{ConnectionId, ConnectionSink, PeerStream};

// ============================================================================
// Hub Commands
// ============================================================================

/// Commands sent to the hub actor.
///
/// Commands are processed strictly one at a time in arrival order. Commands
/// that expect an answer carry a oneshot sender for the response.
pub enum HubCommand {
    /// Register a sensor capability and start watching it.
    ///
    /// # Errors
    /// - `HubError::AlreadyRegistered` if a record with this name exists
    /// - `HubError::Watch` if the sensor refused the watcher
    RegisterSensor {
        sensor: Arc<dyn Sensor>,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// A sensor reported a new state. Fire-and-forget.
    ///
    /// Inserts the record when the name is unknown (forwarded sensors).
    SensorChanged { record: SensorRecord },

    /// Add a subscriber and replay the current state into it.
    RegisterConnection {
        sink: ConnectionSink,
        stream: PeerStream,
        respond_to: oneshot::Sender<Result<ConnectionId, HubError>>,
    },

    /// Remove a subscriber. Sent by the connection's reader task; idempotent.
    UnregisterConnection { id: ConnectionId },

    /// Get all sensor records in insertion order.
    SnapshotSensors {
        respond_to: oneshot::Sender<Vec<SensorRecord>>,
    },

    /// The listener is accepting connections; start broadcasting registrations.
    ///
    /// # Errors
    /// - `HubError::AlreadyRunning` if the hub was marked running before
    MarkRunning {
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
}

impl fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegisterSensor { sensor, .. } => f
                .debug_struct("RegisterSensor")
                .field("name", &sensor.name())
                .finish_non_exhaustive(),
            Self::SensorChanged { record } => f
                .debug_struct("SensorChanged")
                .field("record", record)
                .finish(),
            Self::RegisterConnection { .. } => {
                f.debug_struct("RegisterConnection").finish_non_exhaustive()
            }
            Self::UnregisterConnection { id } => f
                .debug_struct("UnregisterConnection")
                .field("id", id)
                .finish(),
            Self::SnapshotSensors { .. } => f.debug_struct("SnapshotSensors").finish_non_exhaustive(),
            Self::MarkRunning { .. } => f.debug_struct("MarkRunning").finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Hub Errors
// ============================================================================

/// Errors that can occur during hub operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    /// A sensor with this name is registered already.
    #[error("sensor already registered: {0}")]
    AlreadyRegistered(String),

    /// The sensor refused to install the change watcher.
    #[error("failed to watch sensor: {0}")]
    Watch(#[from] SensorError),

    /// The hub was marked running before.
    #[error("the hub is already running")]
    AlreadyRunning,

    /// Termination has been requested and is in progress.
    #[error("the hub is terminating")]
    Terminating,

    /// The hub has been terminated.
    #[error("the hub has been terminated")]
    Terminated,
}

impl HubError {
    /// Returns true for the two shutdown conditions.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

// ============================================================================
// Hub Phase
// ============================================================================

/// Lifecycle of the hub.
///
/// `NotRunning → Running → Terminating → Terminated`. A hub may also go from
/// `NotRunning` straight to `Terminating` when it is shut down before the
/// listener started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubPhase {
    /// Registrations succeed, broadcasts of new registrations are suppressed.
    NotRunning,
    /// Serving subscribers.
    Running,
    /// Closing connections and waiting for their readers.
    Terminating,
    /// Final.
    Terminated,
}

impl fmt::Display for HubPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "not running"),
            Self::Running => write!(f, "running"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Result of handing a change to the hub on behalf of a stoppable task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The hub accepted the change.
    Accepted,
    /// The caller's stop token fired first; the change was dropped.
    Stopped,
}
