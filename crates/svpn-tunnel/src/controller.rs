//! Tunnel Lifecycle Controller
//!
//! Owns the state machine and the single live session. Starts the relay
//! loop and sampler together, and tears both down together on a
//! disconnect request or a relay failure.
//!
//! # Usage
//!
//! ```rust,ignore
//! let controller = TunnelController::new(platform_provider, UdpRelayOpener);
//! controller.request_connect(config).await?;
//!
//! // Presenter side
//! let state = controller.current_state();
//! let sample = controller.current_sample();
//!
//! controller.request_disconnect().await;
//! ```
//!
//! # Teardown
//!
//! Disconnect and relay failure share one path: Stopping, signal both
//! tasks, wait for both, release the socket and the interface, zero the
//! counters and the published sample, Idle. The session is taken out of
//! its slot under the lifecycle lock before anything is released, so a
//! second caller finds nothing to release.

use crate::config::{ConfigError, TunnelConfig};
use crate::io::{RelaySocketOpener, VirtualInterfaceProvider};
use crate::relay::RelayError;
use crate::sampler::{DEFAULT_SAMPLE_INTERVAL, ThroughputSample};
use crate::session::{SessionInfo, TunnelSession};
use crate::state::TunnelState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Controller errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TunnelError {
    #[error("Tunnel setup failed: {0}")]
    SetupFailed(String),

    #[error("Relay I/O error: {0}")]
    RelayIo(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TunnelState, to: TunnelState },

    #[error("Tunnel already active")]
    AlreadyActive,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl From<RelayError> for TunnelError {
    fn from(e: RelayError) -> Self {
        TunnelError::RelayIo(e.to_string())
    }
}

/// Why the last session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `request_disconnect` was called
    UserRequested,
    /// The relay loop hit a fatal I/O error
    RelayFailed(TunnelError),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::UserRequested => f.write_str("disconnected by user"),
            DisconnectReason::RelayFailed(e) => write!(f, "link failed: {}", e),
        }
    }
}

/// Tunnel lifecycle controller
///
/// Cheap to clone; clones share the same session.
pub struct TunnelController<P, O>
where
    P: VirtualInterfaceProvider,
    O: RelaySocketOpener,
{
    inner: Arc<Inner<P, O>>,
}

impl<P, O> Clone for TunnelController<P, O>
where
    P: VirtualInterfaceProvider,
    O: RelaySocketOpener,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<P, O>
where
    P: VirtualInterfaceProvider,
    O: RelaySocketOpener,
{
    provider: P,
    opener: O,
    sample_interval: Duration,
    state: watch::Sender<TunnelState>,
    sample: watch::Sender<ThroughputSample>,
    active: watch::Sender<Option<SessionInfo>>,
    last_disconnect: watch::Sender<Option<DisconnectReason>>,
    /// Lifecycle lock; held across establish and teardown
    session: Mutex<Option<TunnelSession<P::Interface, O::Socket>>>,
    next_session_id: AtomicU64,
}

impl<P, O> TunnelController<P, O>
where
    P: VirtualInterfaceProvider,
    O: RelaySocketOpener,
{
    /// Create a controller sampling throughput every second
    pub fn new(provider: P, opener: O) -> Self {
        Self::with_sample_interval(provider, opener, DEFAULT_SAMPLE_INTERVAL)
    }

    /// Create a controller with a custom sampling interval
    pub fn with_sample_interval(provider: P, opener: O, sample_interval: Duration) -> Self {
        let inner = Inner {
            provider,
            opener,
            sample_interval,
            state: watch::Sender::new(TunnelState::Idle),
            sample: watch::Sender::new(ThroughputSample::ZERO),
            active: watch::Sender::new(None),
            last_disconnect: watch::Sender::new(None),
            session: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Get current state
    pub fn current_state(&self) -> TunnelState {
        *self.inner.state.borrow()
    }

    /// Get the latest throughput sample
    pub fn current_sample(&self) -> ThroughputSample {
        *self.inner.sample.borrow()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<TunnelState> {
        self.inner.state.subscribe()
    }

    /// Watch published samples
    pub fn subscribe_sample(&self) -> watch::Receiver<ThroughputSample> {
        self.inner.sample.subscribe()
    }

    /// Why the most recent session ended
    pub fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.inner.last_disconnect.borrow().clone()
    }

    /// Running session, if any
    pub fn active_session(&self) -> Option<SessionInfo> {
        self.inner.active.borrow().clone()
    }

    /// Config of the running session
    pub fn active_config(&self) -> Option<Arc<TunnelConfig>> {
        self.active_session().map(|s| s.config)
    }

    /// How long the running session has been up
    pub fn connection_duration(&self) -> Option<Duration> {
        self.active_session().map(|s| s.duration())
    }

    /// Bring a session up
    ///
    /// Only valid from Idle; any other state returns `AlreadyActive`
    /// without touching the live session. Setup runs as its own task, so
    /// dropping this future never leaves the controller half-established.
    pub async fn request_connect(&self, config: TunnelConfig) -> Result<(), TunnelError> {
        let inner = self.inner.clone();
        tokio::spawn(inner.establish(config))
            .await
            .map_err(|e| TunnelError::SetupFailed(format!("setup task ended abnormally: {}", e)))?
    }

    /// Tear the session down
    ///
    /// Idempotent: a no-op when Idle, and concurrent calls release the
    /// session's handles exactly once. Returns once the state is Idle.
    /// Like setup, teardown runs to completion even if the caller goes away.
    pub async fn request_disconnect(&self) {
        let inner = self.inner.clone();
        let teardown =
            tokio::spawn(async move { inner.teardown(None, DisconnectReason::UserRequested).await });

        match teardown.await {
            Ok(true) => {}
            Ok(false) => debug!("Disconnect ignored: no active session"),
            Err(e) => error!("Teardown task ended abnormally: {}", e),
        }
    }

    /// Format status for display
    pub fn status(&self) -> String {
        let state = self.current_state();
        match self.connection_duration() {
            Some(up) if state.is_running() => format!(
                "Tunnel: {} | {} | Up: {}s",
                state,
                self.current_sample().format(),
                up.as_secs()
            ),
            _ => format!("Tunnel: {}", state),
        }
    }
}

impl<P, O> Inner<P, O>
where
    P: VirtualInterfaceProvider,
    O: RelaySocketOpener,
{
    fn transition(&self, next: TunnelState) -> Result<(), TunnelError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| match state.transition(next) {
            Ok(next) => {
                debug!("Tunnel state {} -> {}", state, next);
                *state = next;
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Acquire both handles and start a session.
    async fn establish(self: Arc<Self>, config: TunnelConfig) -> Result<(), TunnelError> {
        let mut slot = self.session.lock().await;

        let state = *self.state.borrow();
        if slot.is_some() || !state.is_idle() {
            debug!("Connect ignored: tunnel is {}", state);
            return Err(TunnelError::AlreadyActive);
        }

        config.validate()?;
        self.transition(TunnelState::Establishing)?;
        info!("Establishing tunnel to {} ({})", config.remote, config.session_name);

        let interface = match self.provider.open(&config).await {
            Ok(interface) => interface,
            Err(e) => {
                error!("Virtual interface setup failed: {}", e);
                self.transition(TunnelState::Idle)?;
                return Err(TunnelError::SetupFailed(format!("virtual interface: {}", e)));
            }
        };

        let socket = match self.opener.open(&config.remote).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Relay socket to {} failed: {}", config.remote, e);
                if let Err(e) = self.provider.release(interface).await {
                    warn!("Releasing virtual interface after failed setup: {}", e);
                }
                self.transition(TunnelState::Idle)?;
                return Err(TunnelError::SetupFailed(format!("relay socket {}: {}", config.remote, e)));
            }
        };

        self.transition(TunnelState::Running)?;

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (session, failure) = TunnelSession::spawn(
            id,
            Arc::new(config),
            interface,
            socket,
            self.sample.clone(),
            self.sample_interval,
        );
        self.active.send_replace(Some(session.info.clone()));
        *slot = Some(session);
        drop(slot);

        self.watch_relay_failure(id, failure);
        info!("Tunnel session {} running", id);

        Ok(())
    }

    /// Turn a relay failure of session `id` into a teardown
    fn watch_relay_failure(self: &Arc<Self>, id: u64, failure: oneshot::Receiver<RelayError>) {
        let inner: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            // Closed without a value: the relay stopped on request
            let Ok(err) = failure.await else { return };
            let Some(inner) = inner.upgrade() else { return };

            error!("Tunnel session {} lost: {}", id, err);
            inner
                .teardown(Some(id), DisconnectReason::RelayFailed(err.into()))
                .await;
        });
    }

    /// Tear down the live session, or only session `expected` if given.
    ///
    /// Returns whether this call performed the teardown.
    async fn teardown(&self, expected: Option<u64>, reason: DisconnectReason) -> bool {
        let mut slot = self.session.lock().await;

        let session = match slot.take() {
            Some(session) if expected.is_none_or(|id| id == session.id()) => session,
            other => {
                *slot = other;
                return false;
            }
        };

        let id = session.id();
        info!("Stopping tunnel session {} ({})", id, reason);
        if let Err(e) = self.transition(TunnelState::Stopping) {
            error!("{}", e);
        }

        let counters = session.counters.clone();
        match session.stop().await {
            Some((interface, socket)) => {
                if let Err(e) = self.opener.release(socket).await {
                    warn!("Releasing relay socket of session {}: {}", id, e);
                }
                if let Err(e) = self.provider.release(interface).await {
                    warn!("Releasing virtual interface of session {}: {}", id, e);
                }
            }
            None => warn!("Session {} handles dropped with its relay task", id),
        }

        counters.reset();
        self.sample.send_replace(ThroughputSample::ZERO);
        self.active.send_replace(None);
        self.last_disconnect.send_replace(Some(reason));

        if let Err(e) = self.transition(TunnelState::Idle) {
            error!("{}", e);
        }
        info!("Tunnel session {} stopped", id);

        true
    }
}
