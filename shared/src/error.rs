//! Error taxonomy for connection operations

use std::io;
use thiserror::Error;

use crate::ConnectionId;

/// Errors surfaced to callers of connection and registry operations
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Adapter is not available")]
    AdapterUnavailable,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Socket unavailable: {0}")]
    SocketUnavailable(String),

    #[error("Connection already closed")]
    ConnectionClosed,

    #[error("Transport I/O error: {0}")]
    TransportIo(#[from] io::Error),

    /// Only produced by collaborators (adapters refusing an operation)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl LinkError {
    /// Stable error code used on the control wire
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::AdapterUnavailable => "adapter_unavailable",
            LinkError::DeviceNotFound(_) => "device_not_found",
            LinkError::AlreadyConnected => "already_connected",
            LinkError::NotConnected => "not_connected",
            LinkError::UnknownConnection(_) => "unknown_connection",
            LinkError::SocketUnavailable(_) => "socket_unavailable",
            LinkError::ConnectionClosed => "connection_closed",
            LinkError::TransportIo(_) => "transport_io",
            LinkError::PermissionDenied(_) => "permission_denied",
        }
    }

    /// Shorthand for a timed out transport operation
    pub fn timed_out(what: &str) -> Self {
        LinkError::TransportIo(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out", what),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_snake_case() {
        let errors = [
            LinkError::AdapterUnavailable,
            LinkError::DeviceNotFound("AA:BB".into()),
            LinkError::UnknownConnection(ConnectionId(4)),
            LinkError::TransportIo(io::Error::from(io::ErrorKind::BrokenPipe)),
        ];
        for err in &errors {
            assert!(err.code().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_io_conversion() {
        let err: LinkError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(matches!(err, LinkError::TransportIo(_)));
        assert_eq!(err.code(), "transport_io");
    }

    #[test]
    fn test_timed_out_kind() {
        match LinkError::timed_out("connect") {
            LinkError::TransportIo(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_connection_message() {
        let err = LinkError::UnknownConnection(ConnectionId(9));
        assert_eq!(err.to_string(), "Unknown connection: #9");
    }
}
