//! Transport trait abstraction for pluggable radio backends

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// An open duplex byte stream
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Identity of a remote endpoint, supplied by the caller
pub trait DeviceHandle: Debug + Clone + Send + Sync + 'static {
    /// Human-readable name used in the `connected` notification
    fn label(&self) -> String;
}

/// Factory for opening streams to a device
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The device handle this connector accepts
    type Device: DeviceHandle;

    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Stop any scan running on the shared radio adapter. Best-effort.
    async fn cancel_discovery(&self) -> io::Result<()> {
        Ok(())
    }

    /// Open a stream with the primary strategy
    async fn open(&self, device: &Self::Device) -> io::Result<Self::Stream>;

    /// Open a stream with the fallback strategy, tried once after `open` fails
    async fn open_fallback(&self, device: &Self::Device) -> io::Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
