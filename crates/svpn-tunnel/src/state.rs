//! Tunnel lifecycle state.
//!
//! ```text
//! Idle ──connect──▶ Establishing ──acquired──▶ Running
//!  ▲                     │                        │
//!  │◀───setup failure────┘          disconnect / relay failure
//!  │                                              ▼
//!  └─────────────teardown complete──────────── Stopping
//! ```

use crate::controller::TunnelError;

/// Tunnel state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TunnelState {
    /// No session
    #[default]
    Idle,
    /// Acquiring the interface and relay socket
    Establishing,
    /// Relay loop and sampler running
    Running,
    /// Tearing the session down
    Stopping,
}

impl TunnelState {
    /// Check if no session exists
    pub fn is_idle(&self) -> bool {
        matches!(self, TunnelState::Idle)
    }

    /// Check if traffic is being relayed
    pub fn is_running(&self) -> bool {
        matches!(self, TunnelState::Running)
    }

    /// Check if a session exists in any phase
    pub fn has_session(&self) -> bool {
        !self.is_idle()
    }

    /// Check whether `next` is a legal successor
    pub fn can_transition_to(&self, next: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self, next),
            (Idle, Establishing)
                | (Establishing, Running)
                | (Establishing, Idle)
                | (Running, Stopping)
                | (Stopping, Idle)
        )
    }

    /// Validate a transition
    pub fn transition(self, next: TunnelState) -> Result<TunnelState, TunnelError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TunnelError::InvalidTransition { from: self, to: next })
        }
    }

    /// Short name for display
    pub fn name(&self) -> &'static str {
        match self {
            TunnelState::Idle => "idle",
            TunnelState::Establishing => "establishing",
            TunnelState::Running => "running",
            TunnelState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
