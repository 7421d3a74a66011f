//! Individual control client session handling

use super::dispatch::handle_request;
use super::hub::EventHub;
use crate::connection::ConnectionRegistry;
use anyhow::Result;
use serial_link_shared::codec::{self, CodecError, FrameDecoder};
use serial_link_shared::control::{control_request::Command, ControlEvent, ControlRequest};
use serial_link_shared::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_BUF_SIZE: usize = 4096;

/// One connected control client
///
/// Requests naming an existing connection (write, disconnect) run one at a
/// time per connection, in arrival order. Everything else, connects included,
/// runs on a task of its own. Responses and fanned-out events share a single
/// writer.
pub struct ControlSession<S> {
    stream: S,
    peer: String,
    registry: Arc<ConnectionRegistry>,
    hub: Arc<EventHub>,
}

impl<S> ControlSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, peer: impl Into<String>, registry: Arc<ConnectionRegistry>, hub: Arc<EventHub>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            registry,
            hub,
        }
    }

    /// Serve the client until it disconnects or sends an undecodable frame
    pub async fn run(self) -> Result<()> {
        let ControlSession {
            stream,
            peer,
            registry,
            hub,
        } = self;

        let (mut reader, writer) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        // Subscribe before the first request so no event of ours is missed
        let forward_task = tokio::spawn(forward_events(hub.subscribe(), out_tx.clone()));
        let writer_task = tokio::spawn(write_loop(writer, out_rx));

        let mut dispatcher = Dispatcher::new(registry, out_tx);
        let mut decoder = FrameDecoder::<ControlRequest>::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];

        let result = loop {
            if let Err(e) = dispatcher.dispatch_frames(&mut decoder) {
                break Err(e.into());
            }
            match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) => break Err(e.into()),
            }
        };

        forward_task.abort();
        let _ = forward_task.await;
        drop(dispatcher);

        // Let in-flight requests deliver their responses
        match writer_task.await {
            Ok(Err(e)) => debug!("[CONTROL] {} writer stopped: {}", peer, e),
            Err(e) => warn!("[CONTROL] {} writer task failed: {}", peer, e),
            Ok(Ok(())) => {}
        }
        result
    }
}

/// Routes decoded requests to per-connection lanes or to their own task
struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    out: mpsc::UnboundedSender<ControlEvent>,
    lanes: HashMap<ConnectionId, mpsc::UnboundedSender<ControlRequest>>,
}

impl Dispatcher {
    fn new(registry: Arc<ConnectionRegistry>, out: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            registry,
            out,
            lanes: HashMap::new(),
        }
    }

    fn dispatch_frames(&mut self, decoder: &mut FrameDecoder<ControlRequest>) -> Result<(), CodecError> {
        while let Some(request) = decoder.decode_next()? {
            debug!("[CONTROL] Request {}", request.request_id);
            match target_connection(&request) {
                Some(id) => self.enqueue(id, request),
                None => {
                    let registry = self.registry.clone();
                    let out = self.out.clone();
                    tokio::spawn(async move {
                        let response = handle_request(&registry, request).await;
                        let _ = out.send(ControlEvent::response(response));
                    });
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, id: ConnectionId, request: ControlRequest) {
        let request = match self.lanes.get(&id) {
            Some(lane) => match lane.send(request) {
                Ok(()) => return,
                // The lane retired after its connection went away
                Err(mpsc::error::SendError(request)) => request,
            },
            None => request,
        };

        self.lanes.retain(|_, lane| !lane.is_closed());
        let (lane, requests) = mpsc::unbounded_channel();
        let _ = lane.send(request);
        tokio::spawn(run_lane(id, requests, self.registry.clone(), self.out.clone()));
        self.lanes.insert(id, lane);
    }
}

fn target_connection(request: &ControlRequest) -> Option<ConnectionId> {
    match request.command.as_ref()? {
        Command::Write(write) => Some(ConnectionId(write.connection_id)),
        Command::Disconnect(disconnect) => Some(ConnectionId(disconnect.connection_id)),
        _ => None,
    }
}

/// Execute one connection's requests strictly in order
async fn run_lane(
    id: ConnectionId,
    mut requests: mpsc::UnboundedReceiver<ControlRequest>,
    registry: Arc<ConnectionRegistry>,
    out: mpsc::UnboundedSender<ControlEvent>,
) {
    while let Some(request) = requests.recv().await {
        let response = handle_request(&registry, request).await;
        let _ = out.send(ControlEvent::response(response));

        // Ids are never reused: once gone, stop taking requests but drain the queue
        if !registry.contains(id).await {
            requests.close();
        }
    }
    debug!("[CONTROL] Lane for {} finished", id);
}

async fn forward_events(
    mut events: mpsc::UnboundedReceiver<ControlEvent>,
    out: mpsc::UnboundedSender<ControlEvent>,
) {
    while let Some(event) = events.recv().await {
        if out.send(event).is_err() {
            break;
        }
    }
}

async fn write_loop<S>(mut writer: WriteHalf<S>, mut events: mpsc::UnboundedReceiver<ControlEvent>) -> Result<()>
where
    S: AsyncWrite,
{
    while let Some(event) = events.recv().await {
        let frame = codec::encode(&event)?;
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await?;
    Ok(())
}
