//! Transport trait abstraction for pluggable radio/serial backends

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serial_link_shared::{AdapterState, LinkError};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// A transport stream that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Owned, type-erased transport stream
pub type BoxedStream = Box<dyn TransportStream>;

/// A remote endpoint resolved by an [`Adapter`]
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Address the handle was resolved from
    fn address(&self) -> &str;

    /// Perform the transport handshake and return the connected stream
    async fn open(&self, service: Uuid) -> Result<BoxedStream, LinkError>;
}

/// The local radio (or serial host) shared by every connection
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Human-readable name for this adapter
    fn name(&self) -> &'static str;

    /// Current power state
    async fn state(&self) -> AdapterState;

    /// Resolve an endpoint address into a device handle
    async fn resolve(&self, address: &str) -> Result<Box<dyn DeviceHandle>, LinkError>;

    /// Stop any device discovery so it does not contend with a handshake
    async fn cancel_discovery(&self);

    /// Request a power change
    async fn set_powered(&self, powered: bool) -> Result<(), LinkError>;

    /// Stream of power state changes, starting after the current state
    fn state_changes(&self) -> BoxStream<'static, AdapterState>;
}
