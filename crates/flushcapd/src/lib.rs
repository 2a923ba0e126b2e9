//! Flush Capacitor daemon - sensor hub and changes feed server
//!
//! This crate provides the core infrastructure for the daemon:
//! - `hub` - State actor owning sensor records and subscriber connections
//! - `forwarder` - Re-publishes the changes feed of another instance
//! - `server` - HTTP/WebSocket gateway
//! - `config` - Layered configuration
//!
//! # Architecture
//!
//! ```text
//!   /changes, /api/sensors
//!           │
//!           ▼
//!  ┌─────────────────┐   HubCommand   ┌─────────────────────────┐
//!  │     Server      │───────────────▶│        HubActor         │
//!  │  (axum router)  │                │ (records + connections) │
//!  └────────┬────────┘                └────────────▲────────────┘
//!           │ starts                               │ SensorChanged
//!           ▼                                      │
//!  ┌─────────────────┐  forward_change             │
//!  │   Forwarders    │─────────────────────────────┤
//!  └─────────────────┘                             │
//!  ┌─────────────────┐  watch handler              │
//!  │     Sensors     │─────────────────────────────┘
//!  └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod forwarder;
pub mod hub;
pub mod server;
