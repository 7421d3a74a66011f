//! serial-link shared types
//!
//! This crate provides the types shared between the connection core, the
//! control daemon and its clients: connection ids, the error taxonomy, the
//! connection state machine and the control-socket protocol and codec.

pub mod codec;
pub mod control;
pub mod error;
pub mod state_machine;

use std::fmt;
use uuid::Uuid;

pub use control::AdapterState;
pub use error::LinkError;
pub use state_machine::{ConnectionState, StateCell, Transition, Trigger};

/// Serial Port Profile service UUID, used when the caller names no service
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB);

/// Maximum number of bytes taken from the transport by a single read
pub const READ_CHUNK_SIZE: usize = 1024;

/// Identifier of a connection, unique for the lifetime of its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
