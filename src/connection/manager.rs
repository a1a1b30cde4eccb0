//! Connection manager: the link state machine and owner of its workers

use super::connect::ConnectWorker;
use super::events::EventSink;
use super::session::SessionWorker;
use crate::error::LinkError;
use crate::transport::{DeviceHandle, TransportConnector};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Session read buffer size; each read delivers at most this many bytes
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

const SUPERSEDED_REASON: &str = "Device connection was lost: superseded by a new connection";

/// Lifecycle state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Size of the fixed session read buffer
    pub read_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Identity of one spawned worker. Reports carrying an id that is no longer
/// installed are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Manages a single serial-over-radio connection.
///
/// `connect` is fire-and-forget: the outcome arrives through the sink. The
/// manager must be created inside a Tokio runtime; its workers are spawned
/// onto that runtime. Dropping the manager stops the link.
pub struct ConnectionManager<C: TransportConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: TransportConnector> ConnectionManager<C> {
    /// Create a manager whose workers run on the current Tokio runtime
    pub fn new(connector: C, sink: impl EventSink, config: LinkConfig) -> Self {
        Self::with_runtime(connector, sink, config, Handle::current())
    }

    /// Create a manager whose workers run on `runtime`
    pub fn with_runtime(connector: C, sink: impl EventSink, config: LinkConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                sink: Arc::new(sink),
                config,
                runtime,
                next_worker_id: AtomicU64::new(0),
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    connect_worker: None,
                    session_worker: None,
                }),
            }),
        }
    }

    /// Start connecting to `device`, abandoning any attempt or session in
    /// progress. The last caller wins.
    pub fn connect(&self, device: C::Device) {
        self.shared.connect(device);
    }

    /// Write to the active session. Does nothing unless connected; write
    /// failures are reported to the sink as diagnostics.
    pub async fn write(&self, bytes: &[u8]) {
        let session = {
            let inner = self.shared.lock();
            match inner.state {
                ConnectionState::Connected => inner.session_worker.as_ref().map(SessionWorker::link),
                ConnectionState::Idle | ConnectionState::Connecting => None,
            }
        };

        match session {
            Some(link) => link.write(bytes).await,
            None => debug!("[Link] Write of {} bytes ignored, not connected", bytes.len()),
        }
    }

    /// Write the UTF-8 bytes of `text`
    pub async fn write_text(&self, text: &str) {
        self.write(text.as_bytes()).await;
    }

    /// Cancel both workers and return to idle. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// The transport this manager connects through
    pub fn connector(&self) -> &C {
        &self.shared.connector
    }
}

impl<C: TransportConnector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// State shared between the manager handle and its workers
pub(crate) struct Shared<C: TransportConnector> {
    connector: C,
    sink: Arc<dyn EventSink>,
    config: LinkConfig,
    runtime: Handle,
    next_worker_id: AtomicU64,
    inner: Mutex<Inner<C::Stream>>,
}

struct Inner<S> {
    state: ConnectionState,
    connect_worker: Option<ConnectWorker>,
    session_worker: Option<SessionWorker<S>>,
}

impl<S> Inner<S> {
    fn set_state(&mut self, next: ConnectionState) {
        debug!("[Link] setState() {} -> {}", self.state, next);
        self.state = next;
    }

    fn cancel_connect_worker(&mut self) {
        if let Some(worker) = self.connect_worker.take() {
            worker.cancel();
        }
    }

    fn cancel_session_worker(&mut self) {
        if let Some(worker) = self.session_worker.take() {
            worker.cancel();
        }
    }

    fn is_current_connect(&self, id: WorkerId) -> bool {
        self.connect_worker.as_ref().map(ConnectWorker::id) == Some(id)
    }

    fn is_current_session(&self, id: WorkerId) -> bool {
        self.session_worker.as_ref().map(SessionWorker::id) == Some(id)
    }
}

impl<C: TransportConnector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Inner<C::Stream>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_worker_id(&self) -> WorkerId {
        WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn connector(&self) -> &C {
        &self.connector
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub(crate) fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn connect(self: &Arc<Self>, device: C::Device) {
        info!("[Link] Connect to {:?} via {}", device, self.connector.name());

        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Connecting => inner.cancel_connect_worker(),
            ConnectionState::Idle | ConnectionState::Connected => {}
        }
        self.supersede_session(&mut inner);

        let id = self.next_worker_id();
        inner.connect_worker = Some(ConnectWorker::spawn(Arc::clone(self), id, device));
        inner.set_state(ConnectionState::Connecting);
    }

    fn stop(&self) {
        debug!("[Link] stop");
        let mut inner = self.lock();
        Self::stop_locked(&mut inner);
    }

    fn stop_locked(inner: &mut Inner<C::Stream>) {
        inner.cancel_connect_worker();
        inner.cancel_session_worker();
        inner.set_state(ConnectionState::Idle);
    }

    /// Cancel the installed session and report its loss now, so the report
    /// precedes anything the replacement attempt delivers. The worker's own
    /// report arrives stale and is discarded.
    fn supersede_session(&self, inner: &mut Inner<C::Stream>) {
        if let Some(worker) = inner.session_worker.take() {
            info!("[Link] Session {} superseded by a new connection", worker.id());
            worker.cancel();
            self.sink.connection_lost(SUPERSEDED_REASON);
        }
    }

    /// Install a session over `stream`. A stale worker gets its stream back
    /// so it can close it.
    pub(crate) fn on_connect_success(
        self: &Arc<Self>,
        id: WorkerId,
        stream: C::Stream,
        device: &C::Device,
    ) -> Option<C::Stream> {
        let mut inner = self.lock();
        if !inner.is_current_connect(id) {
            debug!("[Link] Discarding connection from superseded worker {}", id);
            return Some(stream);
        }

        inner.connect_worker = None;
        self.supersede_session(&mut inner);

        let label = format!("Connected to {}", device.label());
        info!("[Link] {}", label);
        self.sink.connected(&label);

        let session_id = self.next_worker_id();
        inner.session_worker = Some(SessionWorker::spawn(Arc::clone(self), session_id, stream));
        inner.set_state(ConnectionState::Connected);
        None
    }

    pub(crate) fn on_connect_failure(&self, id: WorkerId, err: LinkError) {
        let mut inner = self.lock();
        if !inner.is_current_connect(id) {
            debug!("[Link] Discarding failure from superseded worker {}: {}", id, err);
            return;
        }

        warn!("[Link] {}", err);
        self.sink.connect_failed(&err.to_string());
        Self::stop_locked(&mut inner);
    }

    pub(crate) fn on_session_lost(&self, id: WorkerId, err: LinkError) {
        let mut inner = self.lock();
        if !inner.is_current_session(id) {
            debug!("[Link] Discarding loss report from retired session {}: {}", id, err);
            return;
        }

        let reason = format!("Device connection was lost: {}", err);
        warn!("[Link] {}", reason);
        self.sink.error(&err.to_string());
        self.sink.connection_lost(&reason);
        Self::stop_locked(&mut inner);
    }
}
