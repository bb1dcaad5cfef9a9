//! Loopback fixtures for relay and controller tests.

use crate::config::{Endpoint, TunnelConfig};
use crate::io::{RelaySocket, RelaySocketOpener, UdpRelayOpener, VirtualInterfaceProvider};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::DuplexStream;
use tokio::net::UdpSocket;
use tokio::sync::{Notify, mpsc};

/// Two localhost UDP sockets connected to each other.
pub(crate) async fn udp_pair() -> (UdpSocket, UdpSocket) {
    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    a.connect(b.local_addr().unwrap()).await.unwrap();
    b.connect(a.local_addr().unwrap()).await.unwrap();
    (a, b)
}

/// Interface provider backed by in-memory duplex pipes.
///
/// The far end of every opened interface is handed to the test through
/// the receiver returned by [`LoopbackProvider::new`].
pub(crate) struct LoopbackProvider {
    far_ends: mpsc::UnboundedSender<DuplexStream>,
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub fail: AtomicBool,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl LoopbackProvider {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Self {
            far_ends: tx,
            opened: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gate: None,
        };
        (provider, rx)
    }

    /// Provider whose `open` signals `entered` and then waits on `proceed`.
    pub fn gated() -> (Self, mpsc::UnboundedReceiver<DuplexStream>, Arc<Notify>, Arc<Notify>) {
        let (mut provider, rx) = Self::new();
        let entered = Arc::new(Notify::new());
        let proceed = Arc::new(Notify::new());
        provider.gate = Some((entered.clone(), proceed.clone()));
        (provider, rx, entered, proceed)
    }

    pub fn failing() -> Self {
        let (provider, _rx) = Self::new();
        provider.fail.store(true, Ordering::SeqCst);
        provider
    }
}

impl VirtualInterfaceProvider for LoopbackProvider {
    type Interface = DuplexStream;

    async fn open(&self, config: &TunnelConfig) -> io::Result<DuplexStream> {
        if let Some((entered, proceed)) = &self.gate {
            entered.notify_one();
            proceed.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "interface not permitted"));
        }

        let (near, far) = tokio::io::duplex(config.relay_buffer_size() * 2);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.far_ends.send(far);
        Ok(near)
    }

    async fn release(&self, interface: DuplexStream) -> io::Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(interface);
        Ok(())
    }
}

/// UDP socket whose receive side can be forced to fail.
pub(crate) struct TrippableSocket {
    inner: UdpSocket,
    trip: Arc<Notify>,
}

impl TrippableSocket {
    pub fn new(inner: UdpSocket) -> Self {
        Self {
            inner,
            trip: Arc::new(Notify::new()),
        }
    }

    pub fn trip_handle(&self) -> Arc<Notify> {
        self.trip.clone()
    }
}

impl RelaySocket for TrippableSocket {
    async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        self.inner.send(datagram).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::select! {
            _ = self.trip.notified() => {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "forced relay failure"))
            }
            received = self.inner.recv(buf) => received,
        }
    }
}

/// Opener producing [`TrippableSocket`]s that share one trip switch.
pub(crate) struct TestOpener {
    trip: Arc<Notify>,
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub fail: AtomicBool,
}

impl TestOpener {
    pub fn new() -> Self {
        Self {
            trip: Arc::new(Notify::new()),
            opened: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn trip_handle(&self) -> Arc<Notify> {
        self.trip.clone()
    }
}

impl RelaySocketOpener for TestOpener {
    type Socket = TrippableSocket;

    async fn open(&self, endpoint: &Endpoint) -> io::Result<TrippableSocket> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "relay unreachable"));
        }
        let socket = UdpRelayOpener.open(endpoint).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TrippableSocket {
            inner: socket,
            trip: self.trip.clone(),
        })
    }

    async fn release(&self, socket: TrippableSocket) -> io::Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(socket);
        Ok(())
    }
}

/// Config pointing at a localhost peer socket.
pub(crate) fn config_for(peer: &UdpSocket) -> TunnelConfig {
    let addr = peer.local_addr().unwrap();
    TunnelConfig::new(Endpoint::from_ip(addr.ip(), addr.port()))
}
