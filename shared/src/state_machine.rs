//! Connection State Machine
//!
//! Defines the valid lifecycle transitions of a connection and an atomic
//! cell that applies them with compare-and-swap, so that racing close paths
//! agree on a single winner.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, no connect attempted yet
    Idle = 0,
    /// Transport handshake in flight
    Connecting = 1,
    /// Handshake done, reads and writes allowed
    Open = 2,
    /// A close path has won and is releasing the transport
    Closing = 3,
    /// Terminal
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Get the next state for a given trigger, if the transition is valid
    pub fn next(self, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Trigger::*;

        match (self, trigger) {
            // From Idle
            (Idle, ConnectRequested) => Some(Connecting),
            (Idle, CloseRequested) => Some(Closed),

            // From Connecting
            (Connecting, HandshakeSucceeded) => Some(Open),
            (Connecting, HandshakeFailed) => Some(Closed),
            (Connecting, CloseRequested) => Some(Closed),

            // From Open - exactly one close path wins
            (Open, CloseRequested | RemoteClosed | IoFailed) => Some(Closing),

            // From Closing
            (Closing, Released) => Some(Closed),

            // Nothing leaves Closed
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConnectRequested,
    HandshakeSucceeded,
    HandshakeFailed,
    /// Local `disconnect`
    CloseRequested,
    /// Peer closed the stream (EOF)
    RemoteClosed,
    /// Read failed while open
    IoFailed,
    /// Transport released after a close path won
    Released,
}

/// A successfully applied transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Rejected transition, carrying the state observed at the time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub trigger: Trigger,
}

/// Atomic holder for a [`ConnectionState`]
#[derive(Debug)]
pub struct StateCell {
    raw: AtomicU8,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Create a new cell in Idle state
    pub fn new() -> Self {
        Self {
            raw: AtomicU8::new(ConnectionState::Idle as u8),
        }
    }

    /// Get current state
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Apply a trigger atomically
    pub fn apply(&self, trigger: Trigger) -> Result<Transition, InvalidTransition> {
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            let from = ConnectionState::from_u8(current);
            let to = from
                .next(trigger)
                .ok_or(InvalidTransition { from, trigger })?;

            match self.raw.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(Transition { from, to }),
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_state() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Idle);
    }

    #[test]
    fn test_normal_lifecycle() {
        let cell = StateCell::new();

        let t = cell.apply(Trigger::ConnectRequested).unwrap();
        assert_eq!(t.to, ConnectionState::Connecting);

        let t = cell.apply(Trigger::HandshakeSucceeded).unwrap();
        assert_eq!(t.to, ConnectionState::Open);

        let t = cell.apply(Trigger::RemoteClosed).unwrap();
        assert_eq!(t, Transition { from: ConnectionState::Open, to: ConnectionState::Closing });

        let t = cell.apply(Trigger::Released).unwrap();
        assert_eq!(t.to, ConnectionState::Closed);
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_failed_handshake_is_terminal() {
        let cell = StateCell::new();
        cell.apply(Trigger::ConnectRequested).unwrap();
        cell.apply(Trigger::HandshakeFailed).unwrap();
        assert_eq!(cell.get(), ConnectionState::Closed);

        let err = cell.apply(Trigger::ConnectRequested).unwrap_err();
        assert_eq!(err.from, ConnectionState::Closed);
    }

    #[test]
    fn test_second_connect_rejected() {
        let cell = StateCell::new();
        cell.apply(Trigger::ConnectRequested).unwrap();
        let err = cell.apply(Trigger::ConnectRequested).unwrap_err();
        assert_eq!(err.from, ConnectionState::Connecting);
    }

    #[test]
    fn test_close_from_idle() {
        let cell = StateCell::new();
        let t = cell.apply(Trigger::CloseRequested).unwrap();
        assert_eq!(t.to, ConnectionState::Closed);
    }

    #[test]
    fn test_nothing_leaves_closed() {
        let triggers = [
            Trigger::ConnectRequested,
            Trigger::HandshakeSucceeded,
            Trigger::HandshakeFailed,
            Trigger::CloseRequested,
            Trigger::RemoteClosed,
            Trigger::IoFailed,
            Trigger::Released,
        ];
        for trigger in triggers {
            assert_eq!(ConnectionState::Closed.next(trigger), None);
        }
    }

    #[test]
    fn test_single_close_winner_under_contention() {
        for _ in 0..200 {
            let cell = Arc::new(StateCell::new());
            cell.apply(Trigger::ConnectRequested).unwrap();
            cell.apply(Trigger::HandshakeSucceeded).unwrap();

            let handles: Vec<_> = [Trigger::CloseRequested, Trigger::RemoteClosed, Trigger::IoFailed]
                .into_iter()
                .map(|trigger| {
                    let cell = cell.clone();
                    std::thread::spawn(move || cell.apply(trigger).is_ok())
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
            assert_eq!(cell.get(), ConnectionState::Closing);
        }
    }
}
