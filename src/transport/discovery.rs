//! Cancellable Bluetooth adapter scan

use crate::transport::rfcomm::{RfcommDevice, SERIAL_PORT_PROFILE_UUID};
use anyhow::Result;
use bluer::{Adapter, AdapterEvent, Address, Device};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configuration for Bluetooth discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Device name prefix to match
    pub name_prefix: Option<String>,
    /// Only report devices advertising the Serial Port Profile
    pub require_serial_profile: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            name_prefix: None,
            require_serial_profile: true,
        }
    }
}

/// At most one running adapter scan. Dropping the scan task ends the BlueZ
/// discovery session it holds.
pub struct Discovery {
    config: DiscoveryConfig,
    scan: Mutex<Option<JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            scan: Mutex::new(None),
        }
    }

    /// Get the default Bluetooth adapter
    pub async fn default_adapter() -> Result<Adapter> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        Ok(adapter)
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start scanning, replacing any scan already running. Matching devices
    /// are sent on the returned channel until the scan is cancelled.
    pub fn start(&self, adapter: Adapter) -> mpsc::Receiver<RfcommDevice> {
        let (tx, rx) = mpsc::channel(16);
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = scan(adapter, config, tx).await {
                warn!("[BT] Discovery failed: {}", e);
            }
        });

        if let Some(previous) = self.slot().replace(task) {
            previous.abort();
        }
        rx
    }

    /// Stop the running scan. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match self.slot().take() {
            Some(task) => {
                task.abort();
                info!("[BT] Discovery cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn scan(
    adapter: Adapter,
    config: DiscoveryConfig,
    tx: mpsc::Sender<RfcommDevice>,
) -> bluer::Result<()> {
    let mut seen: HashSet<Address> = HashSet::new();

    let discover = adapter.discover_devices().await?;
    tokio::pin!(discover);
    info!("[BT] Discovery started");

    while let Some(evt) = discover.next().await {
        let AdapterEvent::DeviceAdded(addr) = evt else {
            continue;
        };
        if !seen.insert(addr) {
            continue;
        }

        let device = adapter.device(addr)?;
        if !is_serial_device(&config, &device).await {
            continue;
        }

        let mut found = RfcommDevice::new(addr);
        found.name = device.name().await.ok().flatten();
        if tx.send(found).await.is_err() {
            break;
        }
    }

    Ok(())
}

/// Check a device against the name prefix and service filters
async fn is_serial_device(config: &DiscoveryConfig, device: &Device) -> bool {
    if let Some(ref prefix) = config.name_prefix {
        match device.name().await {
            Ok(Some(name)) if name.starts_with(prefix) => {}
            _ => return false,
        }
    }

    if config.require_serial_profile {
        return matches!(
            device.uuids().await,
            Ok(Some(uuids)) if uuids.contains(&SERIAL_PORT_PROFILE_UUID)
        );
    }

    true
}
