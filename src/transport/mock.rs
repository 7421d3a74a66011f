//! In-memory adapter for tests, backed by `tokio::io::duplex`

use crate::transport::traits::{Adapter, BoxedStream, DeviceHandle, TransportStream};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serial_link_shared::{AdapterState, LinkError};
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// The far end of an opened mock connection, as seen by the remote peer
pub struct MockPeer {
    pub address: String,
    pub service: Uuid,
    pub stream: DuplexStream,
    reset: Option<oneshot::Sender<()>>,
}

impl MockPeer {
    /// Make the local end's pending and future reads fail with `ConnectionReset`
    pub fn reset(&mut self) {
        if let Some(reset) = self.reset.take() {
            let _ = reset.send(());
        }
    }
}

/// Counters shared by every stream a [`MockAdapter`] opens
#[derive(Debug, Default)]
pub struct MockStats {
    pub opens: AtomicUsize,
    pub writes: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub discovery_cancels: AtomicUsize,
    pub state_queries: AtomicUsize,
}

pub struct MockAdapter {
    power: watch::Sender<AdapterState>,
    missing: Mutex<HashSet<String>>,
    refusing: Mutex<HashSet<String>>,
    stalling: Mutex<HashSet<String>>,
    stalling_close: Mutex<HashSet<String>>,
    /// While true, `state` answers only after it is cleared
    state_gate: watch::Sender<bool>,
    peers: mpsc::UnboundedSender<MockPeer>,
    pub stats: Arc<MockStats>,
}

impl MockAdapter {
    /// Create a powered adapter and the receiver of peer ends
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let (power, _) = watch::channel(AdapterState::On);
        let adapter = Arc::new(Self {
            power,
            missing: Mutex::new(HashSet::new()),
            refusing: Mutex::new(HashSet::new()),
            stalling: Mutex::new(HashSet::new()),
            stalling_close: Mutex::new(HashSet::new()),
            state_gate: watch::channel(false).0,
            peers,
            stats: Arc::new(MockStats::default()),
        });
        (adapter, peer_rx)
    }

    /// Make `resolve` fail for this address
    pub fn forget(&self, address: &str) {
        self.missing.lock().unwrap().insert(address.to_string());
    }

    /// Make the handshake fail for this address
    pub fn refuse(&self, address: &str) {
        self.refusing.lock().unwrap().insert(address.to_string());
    }

    /// Make the handshake hang forever for this address
    pub fn stall(&self, address: &str) {
        self.stalling.lock().unwrap().insert(address.to_string());
    }

    /// Make closing the transport hang forever for this address
    pub fn stall_close(&self, address: &str) {
        self.stalling_close.lock().unwrap().insert(address.to_string());
    }

    /// Hold `state` answers (read before the hold is released) until called with `false`
    pub fn hold_state(&self, held: bool) {
        self.state_gate.send_replace(held);
    }

    pub fn set_state(&self, state: AdapterState) {
        self.power.send_replace(state);
    }

    pub fn writes(&self) -> usize {
        self.stats.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn state(&self) -> AdapterState {
        let state = *self.power.borrow();
        self.stats.state_queries.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.state_gate.subscribe();
        let _ = gate.wait_for(|held| !*held).await;
        state
    }

    async fn resolve(&self, address: &str) -> Result<Box<dyn DeviceHandle>, LinkError> {
        if self.missing.lock().unwrap().contains(address) {
            return Err(LinkError::DeviceNotFound(address.to_string()));
        }
        Ok(Box::new(MockDevice {
            address: address.to_string(),
            refuse: self.refusing.lock().unwrap().contains(address),
            stall: self.stalling.lock().unwrap().contains(address),
            stall_close: self.stalling_close.lock().unwrap().contains(address),
            peers: self.peers.clone(),
            stats: self.stats.clone(),
        }))
    }

    async fn cancel_discovery(&self) {
        self.stats.discovery_cancels.fetch_add(1, Ordering::SeqCst);
    }

    async fn set_powered(&self, powered: bool) -> Result<(), LinkError> {
        self.set_state(AdapterState::from_powered(powered));
        Ok(())
    }

    fn state_changes(&self) -> BoxStream<'static, AdapterState> {
        let rx = self.power.subscribe();
        stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let state = *rx.borrow_and_update();
            Some((state, rx))
        })
        .boxed()
    }
}

struct MockDevice {
    address: String,
    refuse: bool,
    stall: bool,
    stall_close: bool,
    peers: mpsc::UnboundedSender<MockPeer>,
    stats: Arc<MockStats>,
}

#[async_trait]
impl DeviceHandle for MockDevice {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self, service: Uuid) -> Result<BoxedStream, LinkError> {
        if self.refuse {
            return Err(LinkError::TransportIo(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            )));
        }
        if self.stall {
            std::future::pending::<()>().await;
        }
        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        let (reset_tx, reset_rx) = oneshot::channel();
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let _ = self.peers.send(MockPeer {
            address: self.address.clone(),
            service,
            stream: remote,
            reset: Some(reset_tx),
        });
        Ok(Box::new(MockStream {
            inner: local,
            reset: Some(reset_rx),
            broken: false,
            stall_close: self.stall_close,
            stats: self.stats.clone(),
        }))
    }
}

struct MockStream {
    inner: DuplexStream,
    /// Fires when the peer resets the link
    reset: Option<oneshot::Receiver<()>>,
    broken: bool,
    stall_close: bool,
    stats: Arc<MockStats>,
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(reset) = self.reset.as_mut() {
            match Pin::new(reset).poll(cx) {
                Poll::Ready(Ok(())) => {
                    self.reset = None;
                    self.broken = true;
                }
                // Peer dropped without a reset, the duplex reports EOF
                Poll::Ready(Err(_)) => self.reset = None,
                Poll::Pending => {}
            }
        }
        if self.broken {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "link reset by peer",
            )));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for MockStream {
    async fn shutdown(&mut self) -> Result<()> {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}
