use anyhow::{anyhow, bail, Result};
use bluer::Address;
use serial_link::transport::{
    Discovery, RfcommConfig, RfcommConnector, RfcommDevice, TcpConnector, DEFAULT_FALLBACK_PORT,
};
use serial_link::{ConnectionEvent, ConnectionManager, LinkConfig, TransportConnector};
use std::io::Write;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "usage:
  serial-link rfcomm [<MAC> [<channel>]]   connect over Bluetooth RFCOMM (scans when no MAC is given;
                                           a channel skips the SPP service lookup)
  serial-link tcp <host:port> [<fallback-port>]   connect over TCP (development)";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["tcp", target, rest @ ..] => {
            let device: SocketAddr = target.parse()?;
            let fallback_port = match rest {
                [] => DEFAULT_FALLBACK_PORT,
                [port] => port.parse()?,
                _ => bail!(USAGE),
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let manager = ConnectionManager::new(TcpConnector::new(fallback_port), tx, LinkConfig::default());
            bridge(manager, device, rx).await
        }
        ["rfcomm", rest @ ..] => {
            let (tx, rx) = mpsc::unbounded_channel();
            let manager =
                ConnectionManager::new(RfcommConnector::new(RfcommConfig::default()), tx, LinkConfig::default());
            let device = match rest {
                [] => scan_first(manager.connector().discovery()).await?,
                [address] => parse_device(address)?,
                [address, channel] => parse_device(address)?.with_channel(channel.parse()?),
                _ => bail!(USAGE),
            };
            bridge(manager, device, rx).await
        }
        _ => bail!(USAGE),
    }
}

fn parse_device(address: &str) -> Result<RfcommDevice> {
    let address = address
        .parse::<Address>()
        .map_err(|e| anyhow!("invalid address {}: {}", address, e))?;
    Ok(RfcommDevice::new(address))
}

/// Wait for the first serial device the scan reports. The scan keeps running
/// until the connect attempt cancels it.
async fn scan_first(discovery: &Discovery) -> Result<RfcommDevice> {
    let adapter = Discovery::default_adapter().await?;
    info!("[BT] Scanning on {}", adapter.name());

    let mut found = discovery.start(adapter);
    let device = found
        .recv()
        .await
        .ok_or_else(|| anyhow!("discovery ended without finding a device"))?;
    info!("[BT] Found {:?}", device);
    Ok(device)
}

/// Connect, then pipe stdin lines to the device and device data to stdout
/// until the link goes down or stdin closes
async fn bridge<C: TransportConnector>(
    manager: ConnectionManager<C>,
    device: C::Device,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) -> Result<()> {
    manager.connect(device);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Connected { label }) => info!("{}", label),
                Some(ConnectionEvent::Data(chunk)) => {
                    stdout.write_all(&chunk)?;
                    stdout.flush()?;
                }
                Some(ConnectionEvent::Error { detail }) => debug!("Link diagnostic: {}", detail),
                Some(ConnectionEvent::ConnectFailed { reason }) => {
                    error!("{}", reason);
                    bail!("connection failed");
                }
                Some(ConnectionEvent::ConnectionLost { reason }) => {
                    warn!("{}", reason);
                    break;
                }
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) if manager.is_connected() => manager.write_text(&format!("{}\n", line)).await,
                Some(_) => warn!("Not connected yet, input dropped"),
                None => break,
            },
        }
    }

    manager.stop();
    Ok(())
}
