//! Error taxonomy for the serial link
//!
//! Only `Connect` and `StreamIo` end a phase of the link. `Write` and `Close`
//! are reported as diagnostics and never tear anything down.

use std::io;
use thiserror::Error;

/// Errors raised while establishing or running the link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Both the primary and the fallback connection strategies failed
    #[error("Unable to connect to {device} (primary: {primary}, fallback: {fallback})")]
    Connect {
        device: String,
        primary: io::Error,
        #[source]
        fallback: io::Error,
    },

    /// The read side of an active session failed or reached end of stream
    #[error("Stream read failed: {0}")]
    StreamIo(#[source] io::Error),

    /// A write to the active session failed
    #[error("Write failed: {0}")]
    Write(#[source] io::Error),

    /// Closing a stream during teardown failed
    #[error("Close failed: {0}")]
    Close(#[source] io::Error),

    /// The attempt was cancelled before it resolved
    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// Result type used across the link
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connect_error_names_both_strategies() {
        let err = LinkError::Connect {
            device: "HC-05".into(),
            primary: io::Error::new(io::ErrorKind::ConnectionRefused, "host down"),
            fallback: io::Error::new(io::ErrorKind::TimedOut, "no answer on channel 1"),
        };

        let text = err.to_string();
        assert!(text.starts_with("Unable to connect to HC-05"));
        assert!(text.contains("host down"));
        assert!(text.contains("no answer on channel 1"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_diagnostics_carry_their_cause() {
        let write = LinkError::Write(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
        let close = LinkError::Close(io::Error::new(io::ErrorKind::NotConnected, "released"));

        assert_eq!(write.to_string(), "Write failed: peer gone");
        assert_eq!(close.to_string(), "Close failed: released");
        assert!(write.source().is_some());
    }
}
