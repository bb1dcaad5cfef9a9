//! Live resources of one connection.

use crate::config::TunnelConfig;
use crate::counters::ThroughputCounters;
use crate::io::RelaySocket;
use crate::relay::{PacketRelay, RelayError, RelayExit};
use crate::sampler::{ThroughputSample, ThroughputSampler};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Stop signal observed by the session tasks.
///
/// Dropping the sending side counts as a stop request, so tasks never
/// outlive their session.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once a stop has been requested.
    pub(crate) async fn requested(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

pub(crate) fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, ShutdownSignal(rx))
}

/// Read-only description of the running session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Monotonic session number
    pub id: u64,
    /// Config the session was started with
    pub config: Arc<TunnelConfig>,
    /// When the session entered Running
    pub started_at: Instant,
}

impl SessionInfo {
    /// How long the session has been up
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// One connection: the relay task (which holds the interface and socket
/// handles while it runs), the sampler task and their shared counters.
pub(crate) struct TunnelSession<I, S> {
    pub(crate) info: SessionInfo,
    pub(crate) counters: Arc<ThroughputCounters>,
    shutdown: watch::Sender<bool>,
    relay: JoinHandle<RelayExit<I, S>>,
    sampler: JoinHandle<()>,
}

impl<I, S> TunnelSession<I, S>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: RelaySocket,
{
    /// Start the relay loop and sampler for freshly acquired handles.
    ///
    /// The returned receiver yields the relay failure, if any; it closes
    /// without a value when the relay stops cleanly.
    pub(crate) fn spawn(
        id: u64,
        config: Arc<TunnelConfig>,
        interface: I,
        socket: S,
        publish: watch::Sender<ThroughputSample>,
        sample_interval: Duration,
    ) -> (Self, oneshot::Receiver<RelayError>) {
        let counters = Arc::new(ThroughputCounters::new());
        let (shutdown, signal) = shutdown_channel();
        let (failure_tx, failure_rx) = oneshot::channel();

        let relay = PacketRelay::new(interface, socket, counters.clone(), config.relay_buffer_size());
        let relay_signal = signal.clone();
        let relay = tokio::spawn(async move {
            let exit = relay.run(relay_signal).await;
            if let Err(e) = &exit.result {
                let _ = failure_tx.send(e.clone());
            }
            exit
        });

        let sampler = ThroughputSampler::new(counters.clone(), sample_interval, publish);
        let sampler = tokio::spawn(sampler.run(signal));

        let session = Self {
            info: SessionInfo {
                id,
                config,
                started_at: Instant::now(),
            },
            counters,
            shutdown,
            relay,
            sampler,
        };

        (session, failure_rx)
    }

    pub(crate) fn id(&self) -> u64 {
        self.info.id
    }

    /// Stop both tasks and wait for them to finish.
    ///
    /// Returns the interface and socket handles, or `None` if the relay
    /// task panicked (the handles were dropped with it).
    pub(crate) async fn stop(self) -> Option<(I, S)> {
        self.shutdown.send_replace(true);

        if let Err(e) = self.sampler.await {
            warn!("Sampler task for session {} ended abnormally: {}", self.info.id, e);
        }

        match self.relay.await {
            Ok(exit) => {
                debug!("Relay for session {} stopped", self.info.id);
                Some((exit.interface, exit.socket))
            }
            Err(e) => {
                warn!("Relay task for session {} ended abnormally: {}", self.info.id, e);
                None
            }
        }
    }
}
