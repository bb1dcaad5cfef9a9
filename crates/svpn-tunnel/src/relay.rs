//! Packet Relay Loop
//!
//! Pumps opaque chunks between the virtual interface and the relay socket.
//!
//! ```text
//!  interface ──read──▶ [up buf] ──send──▶ relay socket   (bytes_up)
//!  interface ◀─write── [down buf] ◀─recv── relay socket  (bytes_down)
//! ```
//!
//! Nothing is parsed: whatever the interface yields in one read becomes
//! one datagram, and every datagram is written back verbatim. The loop
//! waits on readiness of both sides and the shutdown signal at once, and
//! every pending send or write also races the shutdown signal, so a stop
//! request is seen even when one side has stopped draining.

use crate::counters::ThroughputCounters;
use crate::io::RelaySocket;
use crate::session::ShutdownSignal;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Fatal relay failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Virtual interface read failed: {0}")]
    InterfaceRead(String),

    #[error("Virtual interface write failed: {0}")]
    InterfaceWrite(String),

    #[error("Virtual interface closed")]
    InterfaceClosed,

    #[error("Relay socket send failed: {0}")]
    SocketSend(String),

    #[error("Relay socket receive failed: {0}")]
    SocketRecv(String),
}

/// What the relay hands back when it stops
pub struct RelayExit<I, S> {
    /// Interface handle, still open
    pub interface: I,
    /// Socket handle, still open
    pub socket: S,
    /// `Ok` on a requested stop, the failure otherwise
    pub result: Result<(), RelayError>,
}

/// Byte pump between one interface and one relay socket
pub struct PacketRelay<I, S> {
    interface: I,
    socket: S,
    counters: Arc<ThroughputCounters>,
    buffer_size: usize,
}

impl<I, S> PacketRelay<I, S>
where
    I: AsyncRead + AsyncWrite + Unpin + Send,
    S: RelaySocket,
{
    /// Create a relay with `buffer_size` bytes per direction
    pub fn new(interface: I, socket: S, counters: Arc<ThroughputCounters>, buffer_size: usize) -> Self {
        Self {
            interface,
            socket,
            counters,
            buffer_size,
        }
    }

    /// Pump until shutdown or the first I/O error.
    ///
    /// Never closes the handles; they come back in the [`RelayExit`].
    pub(crate) async fn run(self, mut shutdown: ShutdownSignal) -> RelayExit<I, S> {
        let PacketRelay {
            interface,
            socket,
            counters,
            buffer_size,
        } = self;

        let (mut tun_rx, mut tun_tx) = tokio::io::split(interface);
        let mut up = vec![0u8; buffer_size];
        let mut down = vec![0u8; buffer_size];

        debug!("Packet relay started ({} byte buffers)", buffer_size);

        let result = loop {
            tokio::select! {
                _ = shutdown.requested() => break Ok(()),

                read = tun_rx.read(&mut up) => match read {
                    Ok(0) => break Err(RelayError::InterfaceClosed),
                    Ok(n) => tokio::select! {
                        _ = shutdown.requested() => break Ok(()),
                        sent = socket.send(&up[..n]) => match sent {
                            Ok(_) => counters.record_up(n),
                            Err(e) => break Err(RelayError::SocketSend(e.to_string())),
                        },
                    },
                    Err(e) => break Err(RelayError::InterfaceRead(e.to_string())),
                },

                recv = socket.recv(&mut down) => match recv {
                    Ok(0) => {}
                    // A stalled interface must not hold off shutdown
                    Ok(n) => tokio::select! {
                        _ = shutdown.requested() => break Ok(()),
                        written = tun_tx.write_all(&down[..n]) => match written {
                            Ok(()) => counters.record_down(n),
                            Err(e) => break Err(RelayError::InterfaceWrite(e.to_string())),
                        },
                    },
                    Err(e) => break Err(RelayError::SocketRecv(e.to_string())),
                },
            }
        };

        match &result {
            Ok(()) => debug!("Packet relay stopped"),
            Err(e) => warn!("Packet relay failed: {}", e),
        }

        RelayExit {
            interface: tun_rx.unsplit(tun_tx),
            socket,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::shutdown_channel;
    use crate::testing::{udp_pair, TrippableSocket};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;

    const BUF: usize = 32_767;

    fn start(
        interface: DuplexStream,
        socket: UdpSocket,
    ) -> (
        Arc<ThroughputCounters>,
        tokio::sync::watch::Sender<bool>,
        JoinHandle<RelayExit<DuplexStream, UdpSocket>>,
    ) {
        let counters = Arc::new(ThroughputCounters::new());
        let (stop, signal) = shutdown_channel();
        let relay = PacketRelay::new(interface, socket, counters.clone(), BUF);
        (counters, stop, tokio::spawn(relay.run(signal)))
    }

    #[tokio::test]
    async fn test_upstream_bytes_verbatim() {
        let (near, mut far) = tokio::io::duplex(64 * 1024);
        let (local, peer) = udp_pair().await;
        let (counters, stop, task) = start(near, local);

        let payload: Vec<u8> = (0..26_000u32).map(|i| (i % 251) as u8).collect();
        far.write_all(&payload[..1000]).await.unwrap();
        far.write_all(&payload[1000..6000]).await.unwrap();
        far.write_all(&payload[6000..]).await.unwrap();

        let mut received = Vec::new();
        let mut buf = vec![0u8; 65_536];
        while received.len() < payload.len() {
            let n = tokio::time::timeout(Duration::from_secs(5), peer.recv(&mut buf))
                .await
                .expect("relay stalled")
                .unwrap();
            received.extend_from_slice(&buf[..n]);
        }

        stop.send_replace(true);
        let exit = task.await.unwrap();

        assert_eq!(received, payload);
        assert_eq!(counters.bytes_up(), payload.len() as u64);
        assert_eq!(counters.bytes_down(), 0);
        assert!(exit.result.is_ok());
    }

    #[tokio::test]
    async fn test_downstream_datagrams_verbatim() {
        let (near, mut far) = tokio::io::duplex(64 * 1024);
        let (local, peer) = udp_pair().await;
        let (counters, stop, task) = start(near, local);

        peer.send(b"first datagram").await.unwrap();
        peer.send(b"second").await.unwrap();

        let expected = b"first datagramsecond";
        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(5), far.read_exact(&mut received))
            .await
            .expect("relay stalled")
            .unwrap();

        stop.send_replace(true);
        task.await.unwrap();

        assert_eq!(&received, expected);
        assert_eq!(counters.bytes_down(), expected.len() as u64);
    }

    #[tokio::test]
    async fn test_interface_closed_is_fatal() {
        let (near, far) = tokio::io::duplex(1024);
        let (local, _peer) = udp_pair().await;
        let (_counters, _stop, task) = start(near, local);

        drop(far);
        let exit = task.await.unwrap();
        assert_eq!(exit.result, Err(RelayError::InterfaceClosed));
    }

    #[tokio::test]
    async fn test_socket_error_is_fatal_and_handles_returned() {
        let (near, mut far) = tokio::io::duplex(1024);
        let (local, _peer) = udp_pair().await;
        let socket = TrippableSocket::new(local);
        let trip = socket.trip_handle();

        let counters = Arc::new(ThroughputCounters::new());
        let (_stop, signal) = shutdown_channel();
        let task = tokio::spawn(PacketRelay::new(near, socket, counters, BUF).run(signal));

        trip.notify_one();
        let exit = task.await.unwrap();
        assert!(matches!(exit.result, Err(RelayError::SocketRecv(_))));

        // Interface handle came back open
        let mut interface = exit.interface;
        interface.write_all(b"still open").await.unwrap();
        let mut buf = [0u8; 10];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still open");
    }

    #[tokio::test]
    async fn test_stop_while_interface_write_blocked() {
        // Far end is never read, so the pipe fills after 64 bytes
        let (near, _far) = tokio::io::duplex(64);
        let (local, peer) = udp_pair().await;
        let (counters, stop, task) = start(near, local);

        peer.send(&[0x5A; 1400]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send_replace(true);

        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay stuck in interface write")
            .unwrap();
        assert!(exit.result.is_ok());
        // The datagram never made it through in full
        assert_eq!(counters.bytes_down(), 0);
    }

    #[tokio::test]
    async fn test_stop_while_idle() {
        let (near, _far) = tokio::io::duplex(1024);
        let (local, _peer) = udp_pair().await;
        let (counters, stop, task) = start(near, local);

        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.send_replace(true);

        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay ignored shutdown")
            .unwrap();
        assert!(exit.result.is_ok());
        assert_eq!(counters.bytes_up(), 0);
    }
}
