//! Development peer for the TCP backend: echoes every byte back

use anyhow::Result;
use tokio::io;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:9000".into());
    let listener = TcpListener::bind(&addr).await?;
    info!("Echo peer listening on {}", addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted {}", peer);
        tokio::spawn(async move {
            match echo(socket).await {
                Ok(bytes) => info!("{} closed after {} bytes", peer, bytes),
                Err(e) => warn!("{} failed: {}", peer, e),
            }
        });
    }
}

async fn echo(mut socket: TcpStream) -> io::Result<u64> {
    let (mut reader, mut writer) = socket.split();
    io::copy(&mut reader, &mut writer).await
}
