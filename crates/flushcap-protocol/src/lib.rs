//! Flush Capacitor Protocol - Framing for the changes feed
//!
//! Every text frame on `/changes` carries exactly one sensor event,
//! `{"name": "...", "state": "..."}`. The same framing is used by the
//! gateway when pushing to browsers and by forwarders when reading from
//! an upstream instance.

pub mod event;
pub mod feed;

pub use event::{decode_event, encode_event, ProtocolError, SensorEvent};
pub use feed::{changes_feed_url, CHANGES_PATH};
