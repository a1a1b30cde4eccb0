//! In-memory transport and event helpers for the unit tests

use crate::connection::ConnectionEvent;
use crate::transport::{DeviceHandle, TransportConnector};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// What a scripted connection strategy does
#[derive(Clone)]
pub(crate) enum Outcome {
    /// Open an in-memory stream; the remote end is kept for the test
    Accept,
    /// Fail immediately
    Refuse,
    /// Never resolve
    Hang,
    /// Open a stream whose reads always fail, counting each read
    Broken(Arc<AtomicUsize>),
    /// Open an in-memory stream that reads normally but fails every write
    /// and its shutdown
    WriteFails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockDevice(pub &'static str);

impl DeviceHandle for MockDevice {
    fn label(&self) -> String {
        self.0.to_string()
    }
}

pub(crate) enum MockStream {
    Duplex(DuplexStream),
    Broken(Arc<AtomicUsize>),
    WriteFails(DuplexStream),
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MockStream::Duplex(stream) | MockStream::WriteFails(stream) => {
                Pin::new(stream).poll_read(cx, buf)
            }
            MockStream::Broken(reads) => {
                reads.fetch_add(1, Ordering::SeqCst);
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "radio link reset",
                )))
            }
        }
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MockStream::Duplex(stream) => Pin::new(stream).poll_write(cx, buf),
            MockStream::Broken(_) => Poll::Ready(Ok(buf.len())),
            MockStream::WriteFails(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "radio buffer rejected write",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MockStream::Duplex(stream) => Pin::new(stream).poll_flush(cx),
            MockStream::Broken(_) | MockStream::WriteFails(_) => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MockStream::Duplex(stream) => Pin::new(stream).poll_shutdown(cx),
            MockStream::Broken(_) => Poll::Ready(Ok(())),
            MockStream::WriteFails(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket already released",
            ))),
        }
    }
}

/// Connector with a scripted outcome per device and strategy
#[derive(Default)]
pub(crate) struct MockConnector {
    plans: HashMap<&'static str, (Outcome, Outcome)>,
    attempts: Mutex<Vec<(&'static str, Strategy)>>,
    peers: Mutex<HashMap<&'static str, DuplexStream>>,
    discovery_cancels: AtomicUsize,
    on_open: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn plan(mut self, device: &'static str, primary: Outcome, fallback: Outcome) -> Self {
        self.plans.insert(device, (primary, fallback));
        self
    }

    pub(crate) fn attempts(&self) -> Vec<(&'static str, Strategy)> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }

    /// Run `hook` inside the next successful open, just before it returns
    pub(crate) fn on_open(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_open.lock().unwrap() = Some(Box::new(hook));
    }

    /// Remote end of the last accepted stream for `device`
    pub(crate) fn take_peer(&self, device: &'static str) -> DuplexStream {
        self.peers
            .lock()
            .unwrap()
            .remove(device)
            .unwrap_or_else(|| panic!("no accepted stream for {}", device))
    }

    async fn attempt(&self, device: &MockDevice, strategy: Strategy) -> io::Result<MockStream> {
        self.attempts.lock().unwrap().push((device.0, strategy));

        let outcome = match self.plans.get(device.0) {
            Some((primary, _)) if strategy == Strategy::Primary => primary.clone(),
            Some((_, fallback)) => fallback.clone(),
            None => Outcome::Refuse,
        };

        let stream = match outcome {
            Outcome::Accept => MockStream::Duplex(self.duplex(device)),
            Outcome::WriteFails => MockStream::WriteFails(self.duplex(device)),
            Outcome::Broken(reads) => MockStream::Broken(reads),
            Outcome::Refuse => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{:?} refused by {}", strategy, device.0),
                ))
            }
            Outcome::Hang => std::future::pending().await,
        };

        let hook = self.on_open.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(stream)
    }

    fn duplex(&self, device: &MockDevice) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        self.peers.lock().unwrap().insert(device.0, remote);
        local
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    type Device = MockDevice;
    type Stream = MockStream;

    async fn cancel_discovery(&self) -> io::Result<()> {
        self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open(&self, device: &MockDevice) -> io::Result<MockStream> {
        self.attempt(device, Strategy::Primary).await
    }

    async fn open_fallback(&self, device: &MockDevice) -> io::Result<MockStream> {
        self.attempt(device, Strategy::Fallback).await
    }

    fn name(&self) -> &'static str {
        "Mock"
    }
}

/// Next non-diagnostic event, failing the test after two seconds
pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(ConnectionEvent::Error { .. })) => continue,
            Ok(Some(event)) => return event,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for an event"),
        }
    }
}

/// Next diagnostic, failing the test after two seconds
pub(crate) async fn next_error(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> String {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(ConnectionEvent::Error { detail })) => return detail,
            Ok(Some(event)) => panic!("unexpected event {:?}", event),
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for a diagnostic"),
        }
    }
}

/// Let pending tasks settle, then require that only diagnostics arrived
pub(crate) async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(
            matches!(event, ConnectionEvent::Error { .. }),
            "unexpected event {:?}",
            event
        );
    }
}
