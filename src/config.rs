//! Connection configuration

use serial_link_shared::{DEFAULT_SERVICE_UUID, READ_CHUNK_SIZE};
use std::time::Duration;
use uuid::Uuid;

/// Configuration shared by every connection of a registry
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Service used when a connect names none
    pub default_service: Uuid,
    /// Upper bound on the transport handshake, `None` waits as long as the transport does
    pub connect_timeout: Option<Duration>,
    /// Maximum bytes per read event
    pub read_chunk_size: usize,
    /// How long a disconnect waits for the transport to close before dropping it
    pub close_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_service: DEFAULT_SERVICE_UUID,
            connect_timeout: Some(Duration::from_secs(10)),
            read_chunk_size: READ_CHUNK_SIZE,
            close_timeout: Duration::from_secs(2),
        }
    }
}
