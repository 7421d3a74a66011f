//! Control-socket protocol messages
//!
//! Requests carry a client-chosen `request_id` that is echoed in the matching
//! [`Response`]. Read, disconnect and adapter-state events are pushed to every
//! control client as they happen.

use prost::{Enumeration, Message, Oneof};

use crate::{ConnectionId, LinkError};

/// Radio adapter power state, using the platform state codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum AdapterState {
    Unknown = 0,
    Off = 10,
    TurningOn = 11,
    On = 12,
    TurningOff = 13,
}

impl AdapterState {
    /// Only a fully powered adapter can carry connections
    pub fn is_enabled(self) -> bool {
        self == AdapterState::On
    }

    pub fn from_powered(powered: bool) -> Self {
        if powered {
            AdapterState::On
        } else {
            AdapterState::Off
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ControlRequest {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,

    #[prost(oneof = "control_request::Command", tags = "2, 3, 4, 5, 6")]
    pub command: Option<control_request::Command>,
}

pub mod control_request {
    use prost::Oneof;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Command {
        #[prost(message, tag = "2")]
        Connect(super::Connect),
        #[prost(message, tag = "3")]
        Write(super::Write),
        #[prost(message, tag = "4")]
        Disconnect(super::Disconnect),
        #[prost(message, tag = "5")]
        GetAdapterState(super::GetAdapterState),
        #[prost(message, tag = "6")]
        SetAdapterPowered(super::SetAdapterPowered),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Connect {
    #[prost(string, tag = "1")]
    pub address: String,

    /// Empty means the default serial port service
    #[prost(string, tag = "2")]
    pub service_uuid: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Write {
    #[prost(uint64, tag = "1")]
    pub connection_id: u64,

    #[prost(oneof = "WritePayload", tags = "2, 3")]
    pub payload: Option<WritePayload>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum WritePayload {
    #[prost(bytes, tag = "2")]
    Data(Vec<u8>),
    #[prost(string, tag = "3")]
    Text(String),
}

impl WritePayload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WritePayload::Data(data) => data,
            WritePayload::Text(text) => text.into_bytes(),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Disconnect {
    #[prost(uint64, tag = "1")]
    pub connection_id: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetAdapterState {}

#[derive(Clone, PartialEq, Message)]
pub struct SetAdapterPowered {
    #[prost(bool, tag = "1")]
    pub powered: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ControlEvent {
    #[prost(oneof = "control_event::Event", tags = "1, 2, 3, 4")]
    pub event: Option<control_event::Event>,
}

pub mod control_event {
    use prost::Oneof;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        Response(super::Response),
        #[prost(message, tag = "2")]
        Data(super::DataReceived),
        #[prost(message, tag = "3")]
        Disconnected(super::Disconnected),
        #[prost(message, tag = "4")]
        AdapterState(super::AdapterStateChanged),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(bool, tag = "2")]
    pub ok: bool,
    /// Set on a successful connect
    #[prost(uint64, tag = "3")]
    pub connection_id: u64,
    #[prost(string, tag = "4")]
    pub error_code: String,
    #[prost(string, tag = "5")]
    pub message: String,
    #[prost(enumeration = "AdapterState", tag = "6")]
    pub adapter_state: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct DataReceived {
    #[prost(uint64, tag = "1")]
    pub connection_id: u64,
    #[prost(bytes = "bytes", tag = "2")]
    pub data: bytes::Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct Disconnected {
    #[prost(uint64, tag = "1")]
    pub connection_id: u64,
    #[prost(bool, tag = "2")]
    pub by_remote: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct AdapterStateChanged {
    #[prost(enumeration = "AdapterState", tag = "1")]
    pub state: i32,
}

/// Builder helpers for responses
impl Response {
    /// Plain success
    pub fn ok(request_id: u64) -> Self {
        Self {
            request_id,
            ok: true,
            connection_id: 0,
            error_code: String::new(),
            message: String::new(),
            adapter_state: AdapterState::Unknown.into(),
        }
    }

    /// Success of a connect, carrying the new connection id
    pub fn connected(request_id: u64, id: ConnectionId) -> Self {
        Self {
            connection_id: id.get(),
            ..Self::ok(request_id)
        }
    }

    /// Success of an adapter state query
    pub fn with_adapter_state(request_id: u64, state: AdapterState) -> Self {
        Self {
            adapter_state: state.into(),
            ..Self::ok(request_id)
        }
    }

    /// Failure with an explicit code
    pub fn error(request_id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: code.into(),
            message: message.into(),
            ..Self::ok(request_id)
        }
    }

    /// Failure from a connection error
    pub fn failed(request_id: u64, err: &LinkError) -> Self {
        Self::error(request_id, err.code(), err.to_string())
    }
}

impl ControlEvent {
    pub fn response(response: Response) -> Self {
        Self {
            event: Some(control_event::Event::Response(response)),
        }
    }

    pub fn data(id: ConnectionId, data: bytes::Bytes) -> Self {
        Self {
            event: Some(control_event::Event::Data(DataReceived {
                connection_id: id.get(),
                data,
            })),
        }
    }

    pub fn disconnected(id: ConnectionId, by_remote: bool) -> Self {
        Self {
            event: Some(control_event::Event::Disconnected(Disconnected {
                connection_id: id.get(),
                by_remote,
            })),
        }
    }

    pub fn adapter_state(state: AdapterState) -> Self {
        Self {
            event: Some(control_event::Event::AdapterState(AdapterStateChanged {
                state: state.into(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state_codes() {
        assert_eq!(AdapterState::Off as i32, 10);
        assert_eq!(AdapterState::On as i32, 12);
        assert_eq!(AdapterState::try_from(13), Ok(AdapterState::TurningOff));
        assert!(AdapterState::try_from(99).is_err());
    }

    #[test]
    fn test_only_on_is_enabled() {
        assert!(AdapterState::On.is_enabled());
        assert!(!AdapterState::TurningOn.is_enabled());
        assert!(!AdapterState::TurningOff.is_enabled());
        assert!(!AdapterState::Off.is_enabled());
        assert_eq!(AdapterState::from_powered(false), AdapterState::Off);
    }

    #[test]
    fn test_text_payload_bytes() {
        let payload = WritePayload::Text("ping".into());
        assert_eq!(payload.into_bytes(), vec![0x70, 0x69, 0x6e, 0x67]);
    }

    #[test]
    fn test_failed_response() {
        let resp = Response::failed(5, &LinkError::NotConnected);
        assert_eq!(resp.request_id, 5);
        assert!(!resp.ok);
        assert_eq!(resp.error_code, "not_connected");
    }

    #[test]
    fn test_adapter_state_response() {
        let resp = Response::with_adapter_state(4, AdapterState::TurningOn);
        assert!(resp.ok);
        assert_eq!(resp.adapter_state(), AdapterState::TurningOn);
        assert_eq!(Response::ok(5).adapter_state(), AdapterState::Unknown);
    }

    #[test]
    fn test_connected_response() {
        let resp = Response::connected(2, ConnectionId(1));
        assert!(resp.ok);
        assert_eq!(resp.connection_id, 1);
    }
}
