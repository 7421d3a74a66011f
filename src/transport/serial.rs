//! Serial port transport for radio links exposed as tty devices
//!
//! A bound RFCOMM channel (`/dev/rfcomm0`) or a USB serial bridge is opened
//! through `tokio-serial`; the endpoint address is the device path.

use crate::transport::traits::{Adapter, BoxedStream, DeviceHandle, TransportStream};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serial_link_shared::{AdapterState, LinkError};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;
use uuid::Uuid;

/// Default baud rate for serial links
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial stream wrapper implementing TransportStream
pub struct SerialTransportStream {
    inner: SerialStream,
}

impl AsyncRead for SerialTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialTransportStream {
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
impl TransportStream for SerialTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        // Serial ports have no half-close; flushing is all that is left to do
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for serial port links
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Timeout applied to the port open call
    pub open_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            open_timeout: Duration::from_secs(2),
        }
    }
}

/// Adapter over local serial device paths
pub struct SerialAdapter {
    config: SerialConfig,
}

impl SerialAdapter {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Adapter for SerialAdapter {
    fn name(&self) -> &'static str {
        "Serial"
    }

    async fn state(&self) -> AdapterState {
        // The host serial subsystem is always up
        AdapterState::On
    }

    async fn resolve(&self, address: &str) -> Result<Box<dyn DeviceHandle>, LinkError> {
        if !Path::new(address).exists() {
            return Err(LinkError::DeviceNotFound(address.to_string()));
        }
        Ok(Box::new(SerialDevice {
            path: address.to_string(),
            config: self.config.clone(),
        }))
    }

    async fn cancel_discovery(&self) {}

    async fn set_powered(&self, _powered: bool) -> Result<(), LinkError> {
        Err(LinkError::PermissionDenied(
            "serial adapter power is not controllable".into(),
        ))
    }

    fn state_changes(&self) -> BoxStream<'static, AdapterState> {
        stream::pending().boxed()
    }
}

struct SerialDevice {
    path: String,
    config: SerialConfig,
}

#[async_trait]
impl DeviceHandle for SerialDevice {
    fn address(&self) -> &str {
        &self.path
    }

    async fn open(&self, _service: Uuid) -> Result<BoxedStream, LinkError> {
        debug!("[SERIAL] Opening {} at {} baud", self.path, self.config.baud_rate);
        let port = tokio_serial::new(&self.path, self.config.baud_rate)
            .timeout(self.config.open_timeout)
            .open_native_async()
            .map_err(|e| LinkError::SocketUnavailable(format!("{}: {}", self.path, e)))?;
        Ok(Box::new(SerialTransportStream { inner: port }))
    }
}
