//! Serial-over-radio link
//!
//! Maintains one point-to-point stream connection to a remote device:
//! connecting with a fallback strategy, shuttling raw bytes both ways once
//! connected, and returning to idle on failure, loss or `stop()`.

pub mod connection;
pub mod error;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connection::{
    latin1, ConnectionEvent, ConnectionManager, ConnectionState, EventSink, LinkConfig,
};
pub use error::{LinkError, Result};
pub use transport::{DeviceHandle, TransportConnector, TransportStream};
