//! Sensor implementations for the Flush Capacitor daemon.
//!
//! - [`ManualSensor`] - state set programmatically (simulation and tests)
//! - [`RandomSensor`] - toggles between two states at random intervals
//! - [`SysfsSensor`] - polls a GPIO value file, optionally driving LEDs
//!
//! Hardware setups are described by a device spec file, see [`spec`].

pub mod manual;
pub mod random;
pub mod spec;
pub mod sysfs;

use std::sync::Arc;

use flushcap_core::{Sensor, STATE_LOCKED, STATE_UNLOCKED};

pub use manual::ManualSensor;
pub use random::RandomSensor;
pub use spec::{sensors_from_spec, sensors_from_spec_file, DeviceSpec, SpecError};
pub use sysfs::{LedPins, SysfsSensor};

/// Names of the two demo sensors.
pub const DEMO_SENSOR_NAMES: [&str; 2] = ["L", "R"];

/// Creates the random demo sensors `L` and `R`.
pub fn demo_sensors() -> Vec<Arc<dyn Sensor>> {
    DEMO_SENSOR_NAMES
        .iter()
        .map(|name| {
            Arc::new(RandomSensor::new(*name, STATE_UNLOCKED, STATE_LOCKED)) as Arc<dyn Sensor>
        })
        .collect()
}
