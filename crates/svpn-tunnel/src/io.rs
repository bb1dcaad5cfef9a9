//! I/O collaborators of the data-plane.
//!
//! The platform supplies the virtual interface (already configured with
//! address, routes, DNS and MTU) as a duplex byte stream, and a socket
//! opener for the relay side. The controller only ever opens and releases
//! handles through these traits; the relay loop is the only reader and
//! writer.

use crate::config::{Endpoint, TunnelConfig};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Source of configured virtual interfaces.
pub trait VirtualInterfaceProvider: Send + Sync + 'static {
    /// Duplex byte stream backed by the interface
    type Interface: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Materialize an interface for `config`.
    fn open(&self, config: &TunnelConfig) -> impl Future<Output = io::Result<Self::Interface>> + Send;

    /// Tear the interface down. Called exactly once per opened interface.
    fn release(&self, mut interface: Self::Interface) -> impl Future<Output = io::Result<()>> + Send {
        async move { interface.shutdown().await }
    }
}

/// Connectionless socket bound to the remote endpoint.
pub trait RelaySocket: Send + Sync + 'static {
    /// Send one datagram to the remote endpoint.
    fn send(&self, datagram: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive one datagram from the remote endpoint.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

impl RelaySocket for UdpSocket {
    fn send(&self, datagram: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        UdpSocket::send(self, datagram)
    }

    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        UdpSocket::recv(self, buf)
    }
}

/// Source of relay sockets.
pub trait RelaySocketOpener: Send + Sync + 'static {
    /// Socket type produced
    type Socket: RelaySocket;

    /// Open a socket connected to `endpoint`.
    fn open(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<Self::Socket>> + Send;

    /// Close a socket. Called exactly once per opened socket.
    fn release(&self, socket: Self::Socket) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            drop(socket);
            Ok(())
        }
    }
}

/// Opens plain UDP sockets connected to the endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpRelayOpener;

impl UdpRelayOpener {
    /// Resolve the endpoint to its first address.
    pub async fn resolve(endpoint: &Endpoint) -> io::Result<SocketAddr> {
        tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve to any address", endpoint),
                )
            })
    }
}

impl RelaySocketOpener for UdpRelayOpener {
    type Socket = UdpSocket;

    async fn open(&self, endpoint: &Endpoint) -> io::Result<UdpSocket> {
        let peer = Self::resolve(endpoint).await?;
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;

        info!("Relay socket {} -> {}", socket.local_addr()?, peer);
        Ok(socket)
    }

    async fn release(&self, socket: UdpSocket) -> io::Result<()> {
        if let Ok(local) = socket.local_addr() {
            debug!("Closing relay socket {}", local);
        }
        drop(socket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_opener_connects_to_peer() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from_ip(peer.local_addr().unwrap().ip(), peer.local_addr().unwrap().port());

        let socket = UdpRelayOpener.open(&endpoint).await.unwrap();
        RelaySocket::send(&socket, b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, socket.local_addr().unwrap());

        UdpRelayOpener.release(socket).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_localhost_name() {
        let addr = UdpRelayOpener::resolve(&Endpoint::new("localhost", 9)).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 9);
    }

    #[tokio::test]
    async fn test_default_interface_release_shuts_down() {
        use tokio::io::AsyncReadExt;

        struct DuplexProvider;
        impl VirtualInterfaceProvider for DuplexProvider {
            type Interface = tokio::io::DuplexStream;

            async fn open(&self, _config: &TunnelConfig) -> io::Result<Self::Interface> {
                unreachable!()
            }
        }

        let (near, mut far) = tokio::io::duplex(64);
        DuplexProvider.release(near).await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
    }
}
