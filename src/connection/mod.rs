//! Connection management for serial links
//!
//! This module handles:
//! - A supervised lifecycle for every link (connect, write, disconnect)
//! - One background reader per open link
//! - Id allocation and routing across all live links
//! - Teardown of every link when the adapter goes away

mod events;
mod link;
mod registry;

pub use events::{EventSink, LinkEvent, SerialEvent};
pub use link::Connection;
pub use registry::ConnectionRegistry;
