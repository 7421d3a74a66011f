pub mod serial;
pub mod tcp;
pub mod traits;

#[cfg(feature = "bluetooth")]
pub mod rfcomm;

#[cfg(test)]
pub(crate) mod mock;

pub use serial::{SerialAdapter, SerialConfig};
pub use tcp::{TcpAdapter, TcpAdapterConfig, TcpTransportStream};
pub use traits::{Adapter, BoxedStream, DeviceHandle, TransportStream};

#[cfg(feature = "bluetooth")]
pub use rfcomm::{RfcommAdapter, RfcommConfig, RfcommTransportStream, DEFAULT_RFCOMM_CHANNEL};
