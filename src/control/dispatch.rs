//! Maps control requests onto registry operations

use crate::connection::ConnectionRegistry;
use serial_link_shared::control::{control_request::Command, ControlRequest, Response};
use serial_link_shared::ConnectionId;
use tracing::debug;
use uuid::Uuid;

pub const INVALID_ARGUMENT: &str = "invalid_argument";

/// Execute one request and build its response
pub async fn handle_request(registry: &ConnectionRegistry, request: ControlRequest) -> Response {
    let request_id = request.request_id;
    let Some(command) = request.command else {
        return Response::error(request_id, INVALID_ARGUMENT, "missing command");
    };

    match command {
        Command::Connect(connect) => {
            let service = if connect.service_uuid.is_empty() {
                None
            } else {
                match Uuid::parse_str(&connect.service_uuid) {
                    Ok(uuid) => Some(uuid),
                    Err(e) => {
                        return Response::error(
                            request_id,
                            INVALID_ARGUMENT,
                            format!("bad service uuid {:?}: {}", connect.service_uuid, e),
                        )
                    }
                }
            };
            match registry.open_with_service(&connect.address, service).await {
                Ok(id) => Response::connected(request_id, id),
                Err(e) => Response::failed(request_id, &e),
            }
        }
        Command::Write(write) => {
            let Some(payload) = write.payload else {
                return Response::error(request_id, INVALID_ARGUMENT, "missing write payload");
            };
            let id = ConnectionId(write.connection_id);
            match registry.send(id, &payload.into_bytes()).await {
                Ok(()) => Response::ok(request_id),
                Err(e) => Response::failed(request_id, &e),
            }
        }
        Command::Disconnect(disconnect) => {
            registry.close(ConnectionId(disconnect.connection_id)).await;
            Response::ok(request_id)
        }
        Command::GetAdapterState(_) => {
            Response::with_adapter_state(request_id, registry.adapter_state().await)
        }
        Command::SetAdapterPowered(power) => {
            debug!("[CONTROL] Power request: {}", power.powered);
            match registry.set_adapter_powered(power.powered).await {
                Ok(()) => Response::ok(request_id),
                Err(e) => Response::failed(request_id, &e),
            }
        }
    }
}
