//! Serial connection manager
//!
//! Turns a raw bidirectional byte stream to a remote serial endpoint into a
//! supervised connection, and keeps a registry of them behind a control
//! protocol.

pub mod config;
pub mod connection;
pub mod control;
pub mod transport;

pub use config::LinkConfig;
pub use connection::{Connection, ConnectionRegistry, EventSink, LinkEvent, SerialEvent};
pub use serial_link_shared::{AdapterState, ConnectionId, ConnectionState, LinkError};
