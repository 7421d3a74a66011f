//! Control socket exposing the registry to host applications
//!
//! Clients send length-prefixed `ControlRequest` frames and receive
//! `ControlEvent` frames: a response per request, plus data, disconnect and
//! adapter state events for every connection.

mod dispatch;
mod hub;
mod session;

pub use dispatch::{handle_request, INVALID_ARGUMENT};
pub use hub::EventHub;
pub use session::ControlSession;

use crate::connection::ConnectionRegistry;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Accept control clients forever
pub async fn serve(listener: TcpListener, registry: Arc<ConnectionRegistry>, hub: Arc<EventHub>) -> Result<()> {
    info!("[CONTROL] Listening on {}", listener.local_addr()?);
    loop {
        let (socket, addr) = listener.accept().await?;
        if let Err(e) = socket.set_nodelay(true) {
            warn!("[CONTROL] Failed to set nodelay for {}: {}", addr, e);
        }
        info!("[CONTROL] Client connected: {}", addr);

        let session = ControlSession::new(socket, addr.to_string(), registry.clone(), hub.clone());
        tokio::spawn(async move {
            match session.run().await {
                Ok(()) => info!("[CONTROL] Client disconnected: {}", addr),
                Err(e) => warn!("[CONTROL] Client {} dropped: {}", addr, e),
            }
        });
    }
}
