//! Notification sink for link lifecycle and data events

use bytes::Bytes;
use tokio::sync::mpsc;

/// Receiver of link notifications.
///
/// `connected`, `connect_failed` and `connection_lost` are delivered while the
/// manager holds its state lock, so implementations must not call back into
/// the manager synchronously. Forwarding to a channel is always safe.
pub trait EventSink: Send + Sync + 'static {
    fn connected(&self, label: &str);

    fn connect_failed(&self, reason: &str);

    fn connection_lost(&self, reason: &str);

    /// One transport read, unmodified
    fn data_received(&self, chunk: Bytes);

    /// Diagnostic only; never implies a state change
    fn error(&self, detail: &str);
}

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Successfully connected to the device
    Connected { label: String },
    /// Both connection strategies failed
    ConnectFailed { reason: String },
    /// An active session ended
    ConnectionLost { reason: String },
    /// Bytes received from the device
    Data(Bytes),
    /// Diagnostic detail
    Error { detail: String },
}

impl EventSink for mpsc::UnboundedSender<ConnectionEvent> {
    fn connected(&self, label: &str) {
        let _ = self.send(ConnectionEvent::Connected {
            label: label.to_string(),
        });
    }

    fn connect_failed(&self, reason: &str) {
        let _ = self.send(ConnectionEvent::ConnectFailed {
            reason: reason.to_string(),
        });
    }

    fn connection_lost(&self, reason: &str) {
        let _ = self.send(ConnectionEvent::ConnectionLost {
            reason: reason.to_string(),
        });
    }

    fn data_received(&self, chunk: Bytes) {
        let _ = self.send(ConnectionEvent::Data(chunk));
    }

    fn error(&self, detail: &str) {
        let _ = self.send(ConnectionEvent::Error {
            detail: detail.to_string(),
        });
    }
}

/// Decode a chunk one byte per character (ISO-8859-1), so arbitrary binary
/// content survives as text without loss
pub fn latin1(chunk: &[u8]) -> String {
    chunk.iter().map(|&b| char::from(b)).collect()
}
