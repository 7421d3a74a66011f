//! TCP transport implementation, simulating the radio link for development

use crate::transport::traits::{Adapter, BoxedStream, DeviceHandle, TransportStream};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serial_link_shared::{AdapterState, LinkError};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> Self {
        Self { inner: stream }
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
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
impl TransportStream for TcpTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for the TCP simulation adapter
#[derive(Debug, Clone)]
pub struct TcpAdapterConfig {
    /// Radio address -> simulated peer socket address
    pub peers: HashMap<String, SocketAddr>,
    /// Whether the simulated adapter starts powered
    pub powered: bool,
}

impl Default for TcpAdapterConfig {
    fn default() -> Self {
        Self {
            peers: HashMap::new(),
            powered: true,
        }
    }
}

impl TcpAdapterConfig {
    /// Add a simulated peer
    pub fn with_peer(mut self, address: impl Into<String>, peer: SocketAddr) -> Self {
        self.peers.insert(address.into().to_uppercase(), peer);
        self
    }
}

/// Adapter that resolves radio addresses to TCP peers
pub struct TcpAdapter {
    peers: HashMap<String, SocketAddr>,
    power: watch::Sender<AdapterState>,
}

impl TcpAdapter {
    pub fn new(config: TcpAdapterConfig) -> Self {
        let peers = config
            .peers
            .into_iter()
            .map(|(addr, peer)| (addr.to_uppercase(), peer))
            .collect();
        let (power, _) = watch::channel(AdapterState::from_powered(config.powered));
        Self { peers, power }
    }

    fn lookup(&self, address: &str) -> Option<SocketAddr> {
        self.peers
            .get(&address.to_uppercase())
            .copied()
            .or_else(|| address.parse().ok())
    }
}

#[async_trait]
impl Adapter for TcpAdapter {
    fn name(&self) -> &'static str {
        "TCP simulation"
    }

    async fn state(&self) -> AdapterState {
        *self.power.borrow()
    }

    async fn resolve(&self, address: &str) -> Result<Box<dyn DeviceHandle>, LinkError> {
        let peer = self
            .lookup(address)
            .ok_or_else(|| LinkError::DeviceNotFound(address.to_string()))?;
        Ok(Box::new(TcpDevice {
            address: address.to_string(),
            peer,
        }))
    }

    async fn cancel_discovery(&self) {
        // Nothing to cancel: the simulation has no discovery
    }

    async fn set_powered(&self, powered: bool) -> Result<(), LinkError> {
        let state = AdapterState::from_powered(powered);
        self.power.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        debug!("[TCP] Simulated adapter is now {:?}", state);
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

struct TcpDevice {
    address: String,
    peer: SocketAddr,
}

#[async_trait]
impl DeviceHandle for TcpDevice {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self, service: Uuid) -> Result<BoxedStream, LinkError> {
        debug!("[TCP] Connecting {} ({}) service {}", self.address, self.peer, service);
        let stream = TcpStream::connect(self.peer).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpTransportStream::new(stream)))
    }
}
