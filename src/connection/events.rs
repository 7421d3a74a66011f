//! Events emitted by connections and the sink interface they are relayed to

use bytes::Bytes;
use serial_link_shared::ConnectionId;
use tokio::sync::mpsc;

/// Event produced by a single connection, untagged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes received from the peer, in read order
    Data(Bytes),
    /// The connection reached its terminal state
    Closed { by_remote: bool },
}

/// Event tagged with the connection it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    Data { id: ConnectionId, data: Bytes },
    Closed { id: ConnectionId, by_remote: bool },
}

impl SerialEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            SerialEvent::Data { id, .. } | SerialEvent::Closed { id, .. } => *id,
        }
    }
}

/// Consumer of per-connection events
///
/// Calls for one connection arrive in order on that connection's relay task.
/// Implementations must not block: a slow sink delays only the connection it
/// is currently handling.
pub trait EventSink: Send + Sync + 'static {
    fn on_data(&self, id: ConnectionId, data: Bytes);
    fn on_closed(&self, id: ConnectionId, by_remote: bool);
}

/// Channel-backed sink
impl EventSink for mpsc::UnboundedSender<SerialEvent> {
    fn on_data(&self, id: ConnectionId, data: Bytes) {
        let _ = self.send(SerialEvent::Data { id, data });
    }

    fn on_closed(&self, id: ConnectionId, by_remote: bool) {
        let _ = self.send(SerialEvent::Closed { id, by_remote });
    }
}
