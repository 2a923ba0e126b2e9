//! Errors reported by sensor capabilities.

use thiserror::Error;

/// Errors that can occur while operating a sensor capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// `watch` was called on a sensor that already has a watcher.
    #[error("watcher already registered for sensor {name}")]
    WatcherRegistered { name: String },

    /// The sensor has been closed already.
    #[error("sensor closed: {name}")]
    Closed { name: String },

    /// The underlying device could not be read or driven.
    #[error("device error on {name}: {reason}")]
    Device { name: String, reason: String },
}

impl SensorError {
    /// Creates a device error from any displayable cause.
    pub fn device<E: std::fmt::Display>(name: &str, err: E) -> Self {
        Self::Device {
            name: name.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type for sensor operations.
pub type SensorResult<T> = Result<T, SensorError>;
