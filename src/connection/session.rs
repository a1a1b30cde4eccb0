//! Session worker: owns an open stream, runs its read loop and serves writes

use super::events::EventSink;
use super::manager::{Shared, WorkerId};
use crate::error::LinkError;
use crate::transport::{TransportConnector, TransportStream};
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// The parts of a session shared by its read loop and its writers
pub(crate) struct SessionLink<S> {
    id: WorkerId,
    writer: Mutex<WriteHalf<S>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
}

impl<S: TransportStream> SessionLink<S> {
    /// Write all of `bytes`. Failures are diagnostics only; the read loop
    /// alone decides when the session ends.
    pub(crate) async fn write(&self, bytes: &[u8]) {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed")),
            result = self.write_all(bytes) => result,
        };

        match result {
            Ok(()) => trace!("[Session {}] Wrote {} bytes", self.id, bytes.len()),
            Err(e) => {
                let err = LinkError::Write(e);
                warn!("[Session {}] Exception during write: {}", self.id, err);
                self.sink.error(&err.to_string());
            }
        }
    }

    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Shut the stream down. A second close is logged and ignored.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("[Session {}] Stream already closed", self.id);
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            let err = LinkError::Close(e);
            warn!("[Session {}] {}", self.id, err);
            self.sink.error(&err.to_string());
        }
    }
}

/// Handle to a running session, owned by the manager
pub(crate) struct SessionWorker<S> {
    link: Arc<SessionLink<S>>,
}

impl<S: TransportStream> SessionWorker<S> {
    /// Split `stream` and start the read loop on the manager's runtime
    pub(crate) fn spawn<C>(shared: Arc<Shared<C>>, id: WorkerId, stream: S) -> Self
    where
        C: TransportConnector<Stream = S>,
    {
        let (reader, writer) = tokio::io::split(stream);
        let link = Arc::new(SessionLink {
            id,
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            sink: Arc::clone(shared.sink()),
        });

        let task_link = Arc::clone(&link);
        let runtime = shared.runtime().clone();
        runtime.spawn(async move {
            info!("[Session {}] BEGIN", id);
            let err = read_loop(&task_link, reader, shared.config().read_buffer_size).await;

            // Unblock any writer still waiting on the stream before closing it.
            task_link.cancel.cancel();
            task_link.close().await;

            shared.on_session_lost(id, err);
        });

        Self { link }
    }

    pub(crate) fn link(&self) -> Arc<SessionLink<S>> {
        Arc::clone(&self.link)
    }
}

impl<S> SessionWorker<S> {
    pub(crate) fn id(&self) -> WorkerId {
        self.link.id
    }

    /// Close the stream out from under the read loop
    pub(crate) fn cancel(&self) {
        debug!("[Session {}] cancel", self.link.id);
        self.link.cancel.cancel();
    }
}

/// Deliver every read as one data event until the stream fails or ends
async fn read_loop<S: TransportStream>(
    link: &SessionLink<S>,
    mut reader: ReadHalf<S>,
    buffer_size: usize,
) -> LinkError {
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let read = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => {
                Err(io::Error::new(io::ErrorKind::ConnectionAborted, "stream closed locally"))
            }
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                return LinkError::StreamIo(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed by remote",
                ));
            }
            Ok(n) => {
                trace!("[Session {}] Read {} bytes", link.id, n);
                link.sink.data_received(Bytes::copy_from_slice(&buffer[..n]));
            }
            Err(e) => {
                debug!("[Session {}] disconnected: {}", link.id, e);
                return LinkError::StreamIo(e);
            }
        }
    }
}
