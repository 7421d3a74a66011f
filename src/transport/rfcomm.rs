//! RFCOMM transport implementation for Bluetooth connections

use crate::transport::traits::{Adapter, BoxedStream, DeviceHandle, TransportStream};
use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{AdapterEvent, AdapterProperty, Address};
use futures::stream::{self, BoxStream, StreamExt};
use serial_link_shared::{AdapterState, LinkError};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default RFCOMM channel serving the serial port profile
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
    peer_addr: Address,
}

impl RfcommTransportStream {
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
        }
    }

    /// Get the peer Bluetooth address
    pub fn peer_address(&self) -> Address {
        self.peer_addr
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
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
impl TransportStream for RfcommTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for the RFCOMM adapter
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// RFCOMM channel number the remote serial service listens on
    pub channel: u8,
    /// Power the adapter on at startup
    pub power_on: bool,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_RFCOMM_CHANNEL,
            power_on: true,
        }
    }
}

/// BlueZ-backed adapter
pub struct RfcommAdapter {
    adapter: bluer::Adapter,
    config: RfcommConfig,
}

impl RfcommAdapter {
    /// Open the default BlueZ adapter
    pub async fn open(config: RfcommConfig) -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        if config.power_on {
            adapter.set_powered(true).await?;
        }
        info!("[BT] Using adapter {}", adapter.name());
        Ok(Self { adapter, config })
    }
}

#[async_trait]
impl Adapter for RfcommAdapter {
    fn name(&self) -> &'static str {
        "Bluetooth"
    }

    async fn state(&self) -> AdapterState {
        match self.adapter.is_powered().await {
            Ok(powered) => AdapterState::from_powered(powered),
            Err(e) => {
                warn!("[BT] Failed to query adapter power: {}", e);
                AdapterState::Unknown
            }
        }
    }

    async fn resolve(&self, address: &str) -> Result<Box<dyn DeviceHandle>, LinkError> {
        let addr: Address = address
            .parse()
            .map_err(|_| LinkError::DeviceNotFound(address.to_string()))?;
        self.adapter
            .device(addr)
            .map_err(|_| LinkError::DeviceNotFound(address.to_string()))?;
        Ok(Box::new(RfcommDevice {
            address: address.to_string(),
            addr,
            channel: self.config.channel,
        }))
    }

    async fn cancel_discovery(&self) {
        // BlueZ ends discovery when the last discovery session is dropped and
        // this process never starts one, so there is nothing to stop here.
        debug!("[BT] No discovery session to cancel");
    }

    async fn set_powered(&self, powered: bool) -> Result<(), LinkError> {
        self.adapter
            .set_powered(powered)
            .await
            .map_err(|e| LinkError::PermissionDenied(e.to_string()))
    }

    fn state_changes(&self) -> BoxStream<'static, AdapterState> {
        let adapter = self.adapter.clone();
        stream::once(async move { adapter.events().await })
            .filter_map(|events| async move {
                match events {
                    Ok(events) => Some(events),
                    Err(e) => {
                        warn!("[BT] Cannot watch adapter events: {}", e);
                        None
                    }
                }
            })
            .flatten()
            .filter_map(|event| async move {
                match event {
                    AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                        Some(AdapterState::from_powered(powered))
                    }
                    _ => None,
                }
            })
            .boxed()
    }
}

struct RfcommDevice {
    address: String,
    addr: Address,
    channel: u8,
}

#[async_trait]
impl DeviceHandle for RfcommDevice {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self, service: Uuid) -> Result<BoxedStream, LinkError> {
        let socket_addr = RfcommAddr::new(self.addr, self.channel);
        info!("[BT] Connecting to {} channel {} (service {})", self.addr, self.channel, service);

        let stream = RfcommStream::connect(socket_addr).await.map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                LinkError::PermissionDenied(e.to_string())
            } else {
                LinkError::TransportIo(e)
            }
        })?;

        info!("[BT] Connected to {}", self.addr);
        Ok(Box::new(RfcommTransportStream::new(stream, self.addr)))
    }
}
