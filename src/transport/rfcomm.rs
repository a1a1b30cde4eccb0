//! RFCOMM transport implementation for Bluetooth serial connections

use crate::transport::discovery::{Discovery, DiscoveryConfig};
use crate::transport::traits::{DeviceHandle, TransportConnector};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ReqError, Role, SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{Address, Uuid};
use futures::StreamExt;
use std::io;
use tracing::{debug, info};

/// Serial Port Profile service class
pub const SERIAL_PORT_PROFILE_UUID: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb);

/// RFCOMM channel bound directly by the fallback strategy
pub const FALLBACK_RFCOMM_CHANNEL: u8 = 1;

/// Where one connection strategy points on the remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfcommTarget {
    /// Let BlueZ look the channel up in the device's service record
    Service(Uuid),
    /// Bind this channel directly, skipping the service lookup
    Channel(u8),
}

/// A remote Bluetooth device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfcommDevice {
    /// Bluetooth MAC address
    pub address: Address,
    /// Advertised name, if known
    pub name: Option<String>,
    /// Service channel, if already known. Skips the service lookup.
    pub channel: Option<u8>,
}

impl RfcommDevice {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
            channel: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }
}

impl DeviceHandle for RfcommDevice {
    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.address.to_string())
    }
}

/// Configuration for RFCOMM connector
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Service class the primary strategy resolves
    pub service: Uuid,
    /// Channel for the fallback strategy
    pub fallback_channel: u8,
    /// Discovery configuration
    pub discovery: DiscoveryConfig,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            service: SERIAL_PORT_PROFILE_UUID,
            fallback_channel: FALLBACK_RFCOMM_CHANNEL,
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// RFCOMM connector for Bluetooth serial devices
pub struct RfcommConnector {
    config: RfcommConfig,
    discovery: Discovery,
}

impl RfcommConnector {
    /// Create a new RFCOMM connector
    pub fn new(config: RfcommConfig) -> Self {
        let discovery = Discovery::new(config.discovery.clone());
        Self { config, discovery }
    }

    /// Create connector whose primary strategy resolves `service`
    pub fn with_service(service: Uuid) -> Self {
        Self::new(RfcommConfig {
            service,
            ..Default::default()
        })
    }

    /// The adapter scan that `cancel_discovery` stops
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Service lookup, unless the device already names its channel
    pub fn primary_target(&self, device: &RfcommDevice) -> RfcommTarget {
        match device.channel {
            Some(channel) => RfcommTarget::Channel(channel),
            None => RfcommTarget::Service(self.config.service),
        }
    }

    pub fn fallback_target(&self) -> RfcommTarget {
        RfcommTarget::Channel(self.config.fallback_channel)
    }
}

async fn connect_target(address: Address, target: RfcommTarget) -> io::Result<RfcommStream> {
    let stream = match target {
        RfcommTarget::Service(uuid) => connect_service(address, uuid).await?,
        RfcommTarget::Channel(channel) => {
            info!("[BT] Connecting to {} channel {}", address, channel);
            RfcommStream::connect(RfcommAddr::new(address, channel)).await?
        }
    };
    info!("[BT] Connected to {}", address);
    Ok(stream)
}

/// Register a client profile for `uuid` and ask BlueZ to connect it. BlueZ
/// resolves the channel from the device's SDP record and hands the socket
/// back as a connect request.
async fn connect_service(address: Address, uuid: Uuid) -> io::Result<RfcommStream> {
    info!("[BT] Connecting to {} service {}", address, uuid);

    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    let device = adapter.device(address)?;
    let mut requests = session
        .register_profile(Profile {
            uuid,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        })
        .await?;

    let mut connect = std::pin::pin!(device.connect_profile(&uuid));
    let mut connect_done = false;
    let request = loop {
        tokio::select! {
            request = requests.next() => match request {
                Some(request) if request.device() == address => break request,
                Some(request) => {
                    debug!("[BT] Rejecting profile connection from {}", request.device());
                    request.reject(ReqError::Rejected);
                }
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "serial profile was unregistered",
                    ));
                }
            },
            result = &mut connect, if !connect_done => {
                result?;
                connect_done = true;
            }
        }
    };

    Ok(request.accept()?)
}

#[async_trait]
impl TransportConnector for RfcommConnector {
    type Device = RfcommDevice;
    type Stream = RfcommStream;

    async fn cancel_discovery(&self) -> io::Result<()> {
        self.discovery.cancel();
        Ok(())
    }

    async fn open(&self, device: &RfcommDevice) -> io::Result<RfcommStream> {
        connect_target(device.address, self.primary_target(device)).await
    }

    async fn open_fallback(&self, device: &RfcommDevice) -> io::Result<RfcommStream> {
        connect_target(device.address, self.fallback_target()).await
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
