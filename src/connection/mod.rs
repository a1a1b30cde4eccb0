//! Connection management for a single serial-over-radio link
//!
//! This module handles:
//! - The Idle / Connecting / Connected state machine
//! - One connect attempt at a time, with a single fallback strategy
//! - The session read loop and writes to the open stream
//! - Lifecycle and data notifications to the host

mod connect;
mod events;
mod manager;
mod session;

pub use events::{latin1, ConnectionEvent, EventSink};
pub use manager::{ConnectionManager, ConnectionState, LinkConfig, DEFAULT_READ_BUFFER_SIZE};
