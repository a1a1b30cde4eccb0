//! TCP transport used to simulate the radio link during development

use crate::transport::traits::{DeviceHandle, TransportConnector};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::info;

/// Port tried when the device's own port refuses the connection
pub const DEFAULT_FALLBACK_PORT: u16 = 9001;

impl DeviceHandle for SocketAddr {
    fn label(&self) -> String {
        self.to_string()
    }
}

/// TCP connector; the fallback strategy reuses the device's IP on a second port
#[derive(Debug, Clone)]
pub struct TcpConnector {
    fallback_port: u16,
}

impl TcpConnector {
    pub fn new(fallback_port: u16) -> Self {
        Self { fallback_port }
    }

    /// Address tried by the fallback strategy
    pub fn fallback_address(&self, device: &SocketAddr) -> SocketAddr {
        SocketAddr::new(device.ip(), self.fallback_port)
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_PORT)
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Device = SocketAddr;
    type Stream = TcpStream;

    async fn open(&self, device: &SocketAddr) -> io::Result<TcpStream> {
        info!("[TCP] Connecting to {}", device);
        TcpStream::connect(device).await
    }

    async fn open_fallback(&self, device: &SocketAddr) -> io::Result<TcpStream> {
        let fallback = self.fallback_address(device);
        info!("[TCP] Connecting to fallback {}", fallback);
        TcpStream::connect(fallback).await
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
