//! svpn tunnel - Userspace VPN data-plane
//!
//! Relays opaque packets between a platform-provided virtual interface
//! and a UDP socket connected to the remote endpoint, measures throughput,
//! and drives the session through a small lifecycle state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     TunnelController                        │
//! │   Idle ─▶ Establishing ─▶ Running ─▶ Stopping ─▶ Idle       │
//! │                                                             │
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────────┐   │
//! │  │  Virtual    │◀─▶│ PacketRelay  │◀─▶│  Relay socket   │   │
//! │  │  interface  │   │   (task)     │   │  (UDP)          │   │
//! │  └─────────────┘   └──────┬───────┘   └────────┬────────┘   │
//! │                           │ bytes up/down      │            │
//! │                    ┌──────▼───────┐            │            │
//! │                    │ Throughput   │            │            │
//! │                    │ Sampler      │──▶ watch   │            │
//! │                    └──────────────┘            │            │
//! └────────────────────────────────────────────────│────────────┘
//!                                                  ▼ UDP
//!                                       ┌───────────────────┐
//!                                       │  Remote endpoint  │
//!                                       └───────────────────┘
//! ```
//!
//! # Features
//!
//! - **No packet parsing**: bytes in, same bytes out
//! - **Lock-free counters**: relay never blocks on the sampler
//! - **Single teardown path**: disconnect and link failure release
//!   every handle exactly once

mod config;
mod controller;
mod counters;
mod io;
mod relay;
mod sampler;
mod servers;
mod session;
mod state;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, Endpoint, Route, TunnelConfig, DEFAULT_RELAY_BUFFER, MAX_MTU, MIN_MTU};
pub use controller::{DisconnectReason, TunnelController, TunnelError};
pub use counters::{CounterWindow, ThroughputCounters};
pub use io::{RelaySocket, RelaySocketOpener, UdpRelayOpener, VirtualInterfaceProvider};
pub use relay::RelayError;
pub use sampler::{format_speed, ThroughputSample, ThroughputSampler, DEFAULT_SAMPLE_INTERVAL};
pub use servers::{
    country_endpoint, CatalogError, ServerCatalog, ServerProfile, DEFAULT_SERVER_PORT,
    FALLBACK_ENDPOINT,
};
pub use session::SessionInfo;
pub use state::TunnelState;
