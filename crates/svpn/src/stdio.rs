//! Process stdin/stdout presented as a virtual interface.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use svpn_tunnel::{TunnelConfig, VirtualInterfaceProvider};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, Stdin, Stdout};
use tracing::info;

/// Duplex stream reading stdin and writing stdout
pub struct StdioInterface {
    stdin: Stdin,
    stdout: Stdout,
}

impl AsyncRead for StdioInterface {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for StdioInterface {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdout).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_shutdown(cx)
    }
}

/// Hands out the process stdio as the tunnel interface
pub struct StdioProvider;

impl VirtualInterfaceProvider for StdioProvider {
    type Interface = StdioInterface;

    async fn open(&self, config: &TunnelConfig) -> io::Result<StdioInterface> {
        info!(
            "Using stdio as interface {}/{} (MTU {})",
            config.address, config.prefix_len, config.mtu
        );
        Ok(StdioInterface {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        })
    }

    async fn release(&self, mut interface: StdioInterface) -> io::Result<()> {
        interface.stdout.flush().await
    }
}
