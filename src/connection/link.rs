//! A single supervised serial connection
//!
//! A [`Connection`] owns one transport stream. After a successful connect it
//! runs exactly one background read task, which forwards every received chunk
//! as [`LinkEvent::Data`] and reports [`LinkEvent::Closed`] exactly once, no
//! matter whether the local side, the peer or an I/O error ends the link.
//!
//! Close paths race through [`StateCell::apply`]: only the path that moves the
//! state from `Open` to `Closing` releases the transport and emits the closed
//! event.

use crate::config::LinkConfig;
use crate::connection::events::LinkEvent;
use crate::transport::{Adapter, BoxedStream, TransportStream};
use bytes::BytesMut;
use serial_link_shared::{ConnectionId, ConnectionState, LinkError, StateCell, Trigger};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Reader = ReadHalf<BoxedStream>;
type Writer = WriteHalf<BoxedStream>;

/// One serial link to a remote endpoint
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    adapter: Arc<dyn Adapter>,
    config: LinkConfig,
    state: StateCell,
    /// Cancelled once, by whichever path closes the connection
    cancel: CancellationToken,
    writer: Mutex<Option<Writer>>,
    /// The read task hands its read half back when cancelled
    reader_task: Mutex<Option<JoinHandle<Option<Reader>>>>,
    /// Unbounded so the read loop never waits on a consumer; the registry
    /// relay drains it as fast as the sink accepts events
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Connection {
    /// Create a new connection in Idle state
    pub fn new(
        id: ConnectionId,
        adapter: Arc<dyn Adapter>,
        config: LinkConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                adapter,
                config,
                state: StateCell::new(),
                cancel: CancellationToken::new(),
                writer: Mutex::new(None),
                reader_task: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Connect to `address`, using the configured default service when `service` is `None`
    pub async fn connect(&self, address: &str, service: Option<Uuid>) -> Result<(), LinkError> {
        let inner = &self.inner;
        inner
            .state
            .apply(Trigger::ConnectRequested)
            .map_err(|rejected| match rejected.from {
                ConnectionState::Closing | ConnectionState::Closed => LinkError::ConnectionClosed,
                _ => LinkError::AlreadyConnected,
            })?;

        let service = service.unwrap_or(inner.config.default_service);
        info!("[LINK] {} connecting to {} (service {})", inner.id, address, service);

        let handshake = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Err(LinkError::ConnectionClosed),
            result = inner.handshake(address, service) => result,
        };
        let stream = match handshake {
            Ok(stream) => stream,
            Err(e) => {
                // Already Closed if a disconnect interrupted the handshake
                let _ = inner.state.apply(Trigger::HandshakeFailed);
                warn!("[LINK] {} connect to {} failed: {}", inner.id, address, e);
                return Err(e);
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        *inner.writer.lock().await = Some(writer);

        // Publish Open and the task handle together so a racing disconnect
        // always finds the task to join.
        let unclaimed = {
            let mut task = inner.reader_task.lock().await;
            match inner.state.apply(Trigger::HandshakeSucceeded) {
                Ok(_) => {
                    *task = Some(tokio::spawn(read_loop(inner.clone(), reader)));
                    None
                }
                Err(_) => Some(reader),
            }
        };

        if let Some(reader) = unclaimed {
            debug!("[LINK] {} closed during handshake, dropping transport", inner.id);
            inner.release(Some(reader)).await;
            return Err(LinkError::ConnectionClosed);
        }

        info!("[LINK] {} open to {}", inner.id, address);
        Ok(())
    }

    /// Write all of `data` to the peer
    ///
    /// Fails with `NotConnected` without touching the transport unless the
    /// connection is open, and aborts with `NotConnected` if the connection is
    /// closed while the write is pending.
    pub async fn write(&self, data: &[u8]) -> Result<(), LinkError> {
        let inner = &self.inner;
        if inner.state.get() != ConnectionState::Open {
            return Err(LinkError::NotConnected);
        }

        let mut guard = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Err(LinkError::NotConnected),
            guard = inner.writer.lock() => guard,
        };
        let writer = match guard.as_mut() {
            Some(writer) if inner.state.get() == ConnectionState::Open => writer,
            _ => return Err(LinkError::NotConnected),
        };

        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Err(LinkError::NotConnected),
            result = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => {
                if let Err(ref e) = result {
                    debug!("[LINK] {} write failed: {}", inner.id, e);
                }
                result.map_err(LinkError::from)
            }
        }
    }

    /// Close the connection locally
    ///
    /// Idempotent and callable from any state. Emits `Closed { by_remote: false }`
    /// only when the connection was open, after the read task has finished.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let transition = match inner.state.apply(Trigger::CloseRequested) {
            Ok(transition) => transition,
            Err(rejected) => {
                debug!("[LINK] {} disconnect ignored in state {}", inner.id, rejected.from);
                return;
            }
        };
        inner.cancel.cancel();

        if transition.from != ConnectionState::Open {
            debug!("[LINK] {} closed from {}", inner.id, transition.from);
            return;
        }

        let task = inner.reader_task.lock().await.take();
        let reader = match task {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };
        inner.release(reader).await;
        let _ = inner.state.apply(Trigger::Released);

        info!("[LINK] {} disconnected locally", inner.id);
        let _ = inner.events.send(LinkEvent::Closed { by_remote: false });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Stops a still-running read task; its stream halves close as they drop
        self.inner.cancel.cancel();
    }
}

impl Inner {
    async fn handshake(&self, address: &str, service: Uuid) -> Result<BoxedStream, LinkError> {
        let device = self.adapter.resolve(address).await?;

        // Discovery competes with the handshake for the radio
        self.adapter.cancel_discovery().await;

        let open = device.open(service);
        match self.config.connect_timeout {
            Some(limit) => timeout(limit, open)
                .await
                .map_err(|_| LinkError::timed_out("connect"))?,
            None => open.await,
        }
    }

    /// Close the transport, swallowing any error
    ///
    /// A transport that does not close within `close_timeout` is dropped.
    async fn release(&self, reader: Option<Reader>) {
        let writer = self.writer.lock().await.take();
        if let (Some(reader), Some(writer)) = (reader, writer) {
            let mut stream = reader.unsplit(writer);
            match timeout(self.config.close_timeout, TransportStream::shutdown(stream.as_mut())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("[LINK] {} transport close failed: {}", self.id, e),
                Err(_) => warn!(
                    "[LINK] {} transport close timed out after {:?}, dropping it",
                    self.id, self.config.close_timeout
                ),
            }
        }
        // Otherwise the remaining halves close the stream as they drop
    }
}

/// Background read loop, one per open connection
async fn read_loop(inner: Arc<Inner>, mut reader: Reader) -> Option<Reader> {
    let chunk_size = inner.config.read_chunk_size.max(1);
    let mut buf = BytesMut::new();

    let trigger = loop {
        buf.resize(chunk_size, 0);
        let result = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break None,
            result = reader.read(&mut buf[..]) => result,
        };

        match result {
            Ok(0) => break Some(Trigger::RemoteClosed),
            Ok(n) => {
                buf.truncate(n);
                let _ = inner.events.send(LinkEvent::Data(buf.split().freeze()));
            }
            Err(e) => {
                debug!("[LINK] {} read failed: {}", inner.id, e);
                break Some(Trigger::IoFailed);
            }
        }
    };

    // A local close owns the teardown and joins on us for the read half
    let Some(trigger) = trigger else {
        return Some(reader);
    };
    if inner.state.apply(trigger).is_err() {
        return Some(reader);
    }

    inner.cancel.cancel();
    inner.release(Some(reader)).await;
    let _ = inner.state.apply(Trigger::Released);

    info!("[LINK] {} closed by remote ({:?})", inner.id, trigger);
    let _ = inner.events.send(LinkEvent::Closed { by_remote: true });
    None
}
