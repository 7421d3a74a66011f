//! Registry of live connections
//!
//! Allocates connection ids, routes commands to the right [`Connection`] and
//! relays each connection's events to the shared [`EventSink`] from a task of
//! its own, so a slow sink call for one connection never holds up another.

use crate::config::LinkConfig;
use crate::connection::events::{EventSink, LinkEvent};
use crate::connection::link::Connection;
use crate::transport::Adapter;
use futures::future::join_all;
use futures::StreamExt;
use serial_link_shared::{AdapterState, ConnectionId, LinkError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ADAPTER_STATE_CAPACITY: usize = 16;

type ConnectionMap = Arc<RwLock<HashMap<ConnectionId, Entry>>>;

/// Tracks every connection that has not reached its terminal state
pub struct ConnectionRegistry {
    adapter: Arc<dyn Adapter>,
    config: LinkConfig,
    connections: ConnectionMap,
    next_id: AtomicU64,
    /// Bumped by every mass teardown, under the map's write lock
    epoch: AtomicU64,
    sink: Arc<dyn EventSink>,
    adapter_state: broadcast::Sender<AdapterState>,
}

struct Entry {
    connection: Arc<Connection>,
    relay: JoinHandle<()>,
}

impl ConnectionRegistry {
    /// Create a registry with the default link configuration
    pub fn new(adapter: Arc<dyn Adapter>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_config(adapter, LinkConfig::default(), sink)
    }

    pub fn with_config(adapter: Arc<dyn Adapter>, config: LinkConfig, sink: Arc<dyn EventSink>) -> Self {
        let (adapter_state, _) = broadcast::channel(ADAPTER_STATE_CAPACITY);
        Self {
            adapter,
            config,
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            sink,
            adapter_state,
        }
    }

    /// Open a connection to `address` on the default service
    pub async fn open(&self, address: &str) -> Result<ConnectionId, LinkError> {
        self.open_with_service(address, None).await
    }

    /// Open a connection to `address`, returning its id once the link is up
    ///
    /// The id is allocated only after the adapter is confirmed enabled. A
    /// failed connect still consumes its id. An adapter teardown that runs
    /// while the state is being checked also refuses the open.
    pub async fn open_with_service(
        &self,
        address: &str,
        service: Option<Uuid>,
    ) -> Result<ConnectionId, LinkError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let adapter_state = self.adapter.state().await;
        if !adapter_state.is_enabled() {
            debug!("[REGISTRY] Refusing open to {}, adapter is {:?}", address, adapter_state);
            return Err(LinkError::AdapterUnavailable);
        }

        let (id, connection) = {
            let mut connections = self.connections.write().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!("[REGISTRY] Refusing open to {}, adapter went down", address);
                return Err(LinkError::AdapterUnavailable);
            }

            let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
            // Unbounded: the read loop must never wait on the sink. Memory
            // is bounded by how fast the relay hands events to the sink.
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let connection = Arc::new(Connection::new(
                id,
                self.adapter.clone(),
                self.config.clone(),
                events_tx,
            ));
            let relay = tokio::spawn(relay_events(
                id,
                events_rx,
                self.connections.clone(),
                self.sink.clone(),
            ));
            connections.insert(
                id,
                Entry {
                    connection: connection.clone(),
                    relay,
                },
            );
            (id, connection)
        };

        match connection.connect(address, service).await {
            Ok(()) => {
                info!("[REGISTRY] Opened {} to {}", id, address);
                Ok(id)
            }
            Err(e) => {
                self.connections.write().await.remove(&id);
                Err(e)
            }
        }
    }

    /// Write `data` to connection `id`
    pub async fn send(&self, id: ConnectionId, data: &[u8]) -> Result<(), LinkError> {
        let connection = self
            .connections
            .read()
            .await
            .get(&id)
            .map(|entry| entry.connection.clone())
            .ok_or(LinkError::UnknownConnection(id))?;
        connection.write(data).await
    }

    /// Disconnect and forget connection `id`; unknown ids are ignored
    ///
    /// Returns after the closed notification, if any, reached the sink.
    pub async fn close(&self, id: ConnectionId) {
        let entry = self.connections.write().await.remove(&id);
        match entry {
            Some(entry) => {
                info!("[REGISTRY] Closing {}", id);
                entry.teardown().await;
            }
            None => debug!("[REGISTRY] Close for unknown {}", id),
        }
    }

    /// React to an adapter state change
    ///
    /// Any state other than `On` first tears down every connection, then the
    /// state is published to subscribers.
    pub async fn on_adapter_state_changed(&self, state: AdapterState) {
        if !state.is_enabled() {
            let closed = self.close_all().await;
            if closed > 0 {
                warn!("[REGISTRY] Adapter is {:?}, closed {} connection(s)", state, closed);
            }
        }
        let _ = self.adapter_state.send(state);
    }

    /// Close every connection
    pub async fn shutdown(&self) {
        let closed = self.close_all().await;
        info!("[REGISTRY] Shut down, closed {} connection(s)", closed);
    }

    async fn close_all(&self) -> usize {
        let entries: Vec<Entry> = {
            let mut connections = self.connections.write().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            connections.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        join_all(entries.into_iter().map(Entry::teardown)).await;
        count
    }

    /// Follow the adapter's state changes until the adapter stops reporting them
    pub fn watch_adapter(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let mut changes = self.adapter.state_changes();
        tokio::spawn(async move {
            while let Some(state) = changes.next().await {
                let Some(registry) = Weak::upgrade(&registry) else {
                    break;
                };
                debug!("[REGISTRY] Adapter reported {:?}", state);
                registry.on_adapter_state_changed(state).await;
            }
            debug!("[REGISTRY] Adapter watch ended");
        })
    }

    pub async fn adapter_state(&self) -> AdapterState {
        self.adapter.state().await
    }

    /// Ask the adapter to change power; the result arrives as a state change
    pub async fn set_adapter_powered(&self, powered: bool) -> Result<(), LinkError> {
        info!("[REGISTRY] Setting {} adapter power to {}", self.adapter.name(), powered);
        self.adapter.set_powered(powered).await
    }

    /// Receive every state passed to [`Self::on_adapter_state_changed`]
    pub fn subscribe_adapter_state(&self) -> broadcast::Receiver<AdapterState> {
        self.adapter_state.subscribe()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Entry {
    /// Disconnect and wait until the relay has delivered the last event
    async fn teardown(self) {
        let Entry { connection, relay } = self;
        connection.disconnect().await;
        // The relay ends on the closed event, or once the last sender is gone
        // for a connection that never opened.
        drop(connection);
        if let Err(e) = relay.await {
            warn!("[REGISTRY] Event relay failed: {}", e);
        }
    }
}

/// Forward one connection's events to the sink, tagged with its id
async fn relay_events(
    id: ConnectionId,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    connections: ConnectionMap,
    sink: Arc<dyn EventSink>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Data(data) => sink.on_data(id, data),
            LinkEvent::Closed { by_remote } => {
                // Never leave a closed connection visible in the map
                let removed = connections.write().await.remove(&id);
                if removed.is_some() {
                    debug!("[REGISTRY] {} closed by remote, removed", id);
                }
                sink.on_closed(id, by_remote);
                break;
            }
        }
    }
}
