//! Fan-out of connection and adapter events to every control session
//!
//! Each session gets its own unbounded queue, so no session ever loses an
//! event and a busy connection cannot push another connection's events out.

use crate::connection::{ConnectionRegistry, EventSink};
use bytes::Bytes;
use serial_link_shared::control::ControlEvent;
use serial_link_shared::{AdapterState, ConnectionId};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Event sink that publishes to all subscribed sessions
#[derive(Default)]
pub struct EventHub {
    /// Held only for non-blocking sends
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ControlEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published from now on; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ControlEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: ControlEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<ControlEvent>>> {
        // Sends cannot panic, so a poisoned list is still consistent
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Relay the registry's adapter state changes to all sessions
    pub fn forward_adapter_states(self: &Arc<Self>, registry: &ConnectionRegistry) -> JoinHandle<()> {
        let hub = self.clone();
        let mut states = registry.subscribe_adapter_state();
        tokio::spawn(async move {
            loop {
                match states.recv().await {
                    Ok(state) => hub.publish_adapter_state(state),
                    Err(RecvError::Lagged(skipped)) => {
                        // Only the latest state matters to clients
                        warn!("[CONTROL] Skipped {} adapter state changes", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("[CONTROL] Adapter state relay ended");
        })
    }

    fn publish_adapter_state(&self, state: AdapterState) {
        self.publish(ControlEvent::adapter_state(state));
    }
}

impl EventSink for EventHub {
    fn on_data(&self, id: ConnectionId, data: Bytes) {
        self.publish(ControlEvent::data(id, data));
    }

    fn on_closed(&self, id: ConnectionId, by_remote: bool) {
        self.publish(ControlEvent::disconnected(id, by_remote));
    }
}
