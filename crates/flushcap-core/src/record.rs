//! Sensor records as stored by the hub and carried on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State reported while the room is free.
pub const STATE_UNLOCKED: &str = "unlocked";

/// State reported while the room is occupied.
pub const STATE_LOCKED: &str = "locked";

/// State reported when the sensor cannot be read.
pub const STATE_ERROR: &str = "error";

/// The last known state of one named sensor.
///
/// `name` is the unique key within one hub. `state` is one of a small set of
/// values (see the `STATE_*` constants) but is kept as a string so that
/// forwarded events from other instances pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorRecord {
    pub name: String,
    pub state: String,
}

impl SensorRecord {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
        }
    }

    /// Returns true when the sensor reported a read failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.state == STATE_ERROR
    }
}

impl fmt::Display for SensorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_as_name_and_state() {
        let record = SensorRecord::new("L", STATE_UNLOCKED);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"name":"L","state":"unlocked"}"#);
    }

    #[test]
    fn test_record_display() {
        assert_eq!(SensorRecord::new("R", STATE_LOCKED).to_string(), "R=locked");
    }

    #[test]
    fn test_is_error() {
        assert!(SensorRecord::new("L", STATE_ERROR).is_error());
        assert!(!SensorRecord::new("L", STATE_LOCKED).is_error());
    }
}
