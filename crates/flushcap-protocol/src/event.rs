//! Sensor event encoding and decoding.

use std::fmt;

use flushcap_core::SensorRecord;
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

/// A sensor event as carried on the wire. Same shape as the hub record.
pub type SensorEvent = SensorRecord;

/// Errors produced while decoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not a JSON object of the expected shape.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload decoded, but the sensor name is empty.
    #[error("event without a sensor name")]
    MissingName,
}

/// Encodes an event as a text frame payload.
pub fn encode_event(event: &SensorEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a text frame payload into an event.
///
/// Unknown extra fields are ignored so newer peers can add data without
/// breaking older forwarders.
/// Only a JSON object is accepted; the array form of the record is not.
pub fn decode_event(payload: &str) -> Result<SensorEvent, ProtocolError> {
    let WireEvent { name, state } = serde_json::from_str(payload)?;
    if name.is_empty() {
        return Err(ProtocolError::MissingName);
    }
    Ok(SensorEvent::new(name, state))
}

/// Inbound frame. Deserializes from a map only.
struct WireEvent {
    name: String,
    state: String,
}

impl<'de> Deserialize<'de> for WireEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(WireEventVisitor)
    }
}

struct WireEventVisitor;

impl<'de> Visitor<'de> for WireEventVisitor {
    type Value = WireEvent;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object with `name` and `state`")
    }

    fn visit_map<A>(self, mut map: A) -> Result<WireEvent, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut name = None;
        let mut state = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "name" => {
                    if name.is_some() {
                        return Err(de::Error::duplicate_field("name"));
                    }
                    name = Some(map.next_value()?);
                }
                "state" => {
                    if state.is_some() {
                        return Err(de::Error::duplicate_field("state"));
                    }
                    state = Some(map.next_value()?);
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(WireEvent {
            name: name.ok_or_else(|| de::Error::missing_field("name"))?,
            state: state.ok_or_else(|| de::Error::missing_field("state"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_event() {
        let event = SensorEvent::new("L", "locked");
        assert_eq!(
            encode_event(&event).unwrap(),
            r#"{"name":"L","state":"locked"}"#
        );
    }

    #[test]
    fn test_decode_event() {
        let event = decode_event(r#"{"name":"R","state":"unlocked"}"#).unwrap();
        assert_eq!(event, SensorEvent::new("R", "unlocked"));
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let event = decode_event(r#"{"name":"R","state":"locked","since":12}"#).unwrap();
        assert_eq!(event.state, "locked");
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(matches!(
            decode_event(r#"{"name":"R"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_event(r#"{"name":1,"state":"locked"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_event("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        // The sequence form of the record is not a valid frame
        assert!(matches!(
            decode_event(r#"["L","locked"]"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_event(r#"{"name":"L","state":"locked","state":"unlocked"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_name() {
        assert!(matches!(
            decode_event(r#"{"name":"","state":"locked"}"#),
            Err(ProtocolError::MissingName)
        ));
    }
}
