//! Connect worker: one in-flight connection attempt

use super::manager::{Shared, WorkerId};
use crate::error::{LinkError, Result};
use crate::transport::{DeviceHandle, TransportConnector};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handle to a running connect attempt, owned by the manager
pub(crate) struct ConnectWorker {
    id: WorkerId,
    cancel: CancellationToken,
}

impl ConnectWorker {
    /// Spawn an attempt for `device`. The outcome is reported exactly once,
    /// through `on_connect_success` or `on_connect_failure`.
    pub(crate) fn spawn<C: TransportConnector>(
        shared: Arc<Shared<C>>,
        id: WorkerId,
        device: C::Device,
    ) -> Self {
        let cancel = CancellationToken::new();
        let runtime = shared.runtime().clone();
        runtime.spawn(run(shared, id, device, cancel.clone()));
        Self { id, cancel }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Abandon the attempt; an in-flight open unblocks with `Cancelled`
    pub(crate) fn cancel(&self) {
        debug!("[Connect {}] cancel", self.id);
        self.cancel.cancel();
    }
}

async fn run<C: TransportConnector>(
    shared: Arc<Shared<C>>,
    id: WorkerId,
    device: C::Device,
    cancel: CancellationToken,
) {
    debug!("[Connect {}] BEGIN {:?}", id, device);

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LinkError::Cancelled),
        outcome = establish(&shared, id, &device, &cancel) => outcome,
    };

    match outcome {
        Ok(stream) => {
            if let Some(mut stale) = shared.on_connect_success(id, stream, &device) {
                if let Err(e) = stale.shutdown().await {
                    warn!("[Connect {}] {}", id, LinkError::Close(e));
                }
            }
        }
        Err(err) => shared.on_connect_failure(id, err),
    }
}

/// Primary strategy, then exactly one fallback
async fn establish<C: TransportConnector>(
    shared: &Shared<C>,
    id: WorkerId,
    device: &C::Device,
    cancel: &CancellationToken,
) -> Result<C::Stream> {
    let connector = shared.connector();

    if let Err(e) = connector.cancel_discovery().await {
        debug!("[Connect {}] Could not cancel discovery: {}", id, e);
    }

    let primary = match connector.open(device).await {
        Ok(stream) => {
            info!("[Connect {}] Connected via {}", id, connector.name());
            return Ok(stream);
        }
        Err(e) => e,
    };

    warn!("[Connect {}] {}; trying fallback...", id, primary);
    if !cancel.is_cancelled() {
        shared.sink().error(&primary.to_string());
    }

    match connector.open_fallback(device).await {
        Ok(stream) => {
            info!("[Connect {}] Connected via {} fallback", id, connector.name());
            Ok(stream)
        }
        Err(fallback) => {
            error!("[Connect {}] Couldn't establish a connection: {}", id, fallback);
            if !cancel.is_cancelled() {
                shared.sink().error(&fallback.to_string());
            }
            Err(LinkError::Connect {
                device: device.label(),
                primary,
                fallback,
            })
        }
    }
}
