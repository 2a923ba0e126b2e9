//! Flush Capacitor Core - Shared types for occupancy reporting
//!
//! This crate provides the domain types shared between the daemon
//! (flushcapd), the wire protocol and the sensor implementations.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod record;
pub mod sensor;

// Re-exports for convenience
pub use error::{SensorError, SensorResult};
pub use record::{SensorRecord, STATE_ERROR, STATE_LOCKED, STATE_UNLOCKED};
pub use sensor::{change_handler, ChangeHandler, Sensor};
