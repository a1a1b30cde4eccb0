pub mod discovery;
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use discovery::{Discovery, DiscoveryConfig};
pub use rfcomm::{
    RfcommConfig, RfcommConnector, RfcommDevice, RfcommTarget, FALLBACK_RFCOMM_CHANNEL,
    SERIAL_PORT_PROFILE_UUID,
};
pub use tcp::{TcpConnector, DEFAULT_FALLBACK_PORT};
pub use traits::{DeviceHandle, TransportConnector, TransportStream};
