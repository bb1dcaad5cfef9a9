//! Tunnel Configuration
//!
//! Describes the virtual interface (address, routes, DNS, MTU) and the
//! remote relay endpoint for one session. A config is immutable once
//! handed to the controller.
//!
//! # File format
//!
//! ```toml
//! session_name = "SecureVPN"
//! address = "10.0.0.2"
//! prefix_len = 24
//! routes = ["0.0.0.0/0"]
//! dns = ["8.8.8.8", "8.8.4.4"]
//! mtu = 1500
//!
//! [remote]
//! host = "8.8.8.8"
//! port = 53
//! ```

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;

/// Smallest MTU an IPv4 host must accept
pub const MIN_MTU: u16 = 576;

/// Largest UDP payload an IPv4 datagram can carry
pub const MAX_MTU: u16 = 65_507;

/// Relay chunk size used when the MTU is smaller
pub const DEFAULT_RELAY_BUFFER: usize = 32_767;

/// Remote relay endpoint (host + port)
///
/// The host may be an IP literal or a name; resolution happens when the
/// relay socket is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP literal
    pub host: String,
    /// UDP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Create from an IP address
    pub fn from_ip(addr: IpAddr, port: u16) -> Self {
        Self::new(addr.to_string(), port)
    }

    /// Validate host and port
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::from_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A route pushed into the virtual interface, in CIDR form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route {
    /// Network address
    pub addr: IpAddr,
    /// Prefix length
    pub prefix: u8,
}

impl Route {
    /// Create a new route
    pub fn new(addr: IpAddr, prefix: u8) -> Self {
        Self { addr, prefix }
    }

    /// 0.0.0.0/0: send all IPv4 traffic through the tunnel
    pub fn default_v4() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    /// Check the prefix fits the address family
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = max_prefix(&self.addr);
        if self.prefix > max {
            return Err(ConfigError::InvalidPrefix {
                prefix: self.prefix,
                max,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Route {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| ConfigError::InvalidRoute(s.to_string()))?;
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidRoute(s.to_string()))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidRoute(s.to_string()))?;

        let route = Route::new(addr, prefix);
        route.validate()?;
        Ok(route)
    }
}

impl TryFrom<String> for Route {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.to_string()
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Complete tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Label the platform shows for the interface
    pub session_name: String,
    /// Our address inside the tunnel
    pub address: IpAddr,
    /// Prefix length of `address`
    pub prefix_len: u8,
    /// Routes pushed into the interface
    pub routes: Vec<Route>,
    /// DNS servers used inside the tunnel
    pub dns: Vec<IpAddr>,
    /// Interface MTU
    pub mtu: u16,
    /// Where relayed traffic goes
    pub remote: Endpoint,
}

impl TunnelConfig {
    /// Create a configuration with default interface settings
    pub fn new(remote: Endpoint) -> Self {
        Self {
            session_name: "SecureVPN".to_string(),
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            prefix_len: 24,
            routes: vec![Route::default_v4()],
            dns: vec![
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
            ],
            mtu: 1500,
            remote,
        }
    }

    /// Set the MTU
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Replace the route list
    pub fn with_routes(mut self, routes: Vec<Route>) -> Self {
        self.routes = routes;
        self
    }

    /// Replace the DNS server list
    pub fn with_dns(mut self, servers: Vec<IpAddr>) -> Self {
        self.dns = servers;
        self
    }

    /// Point the tunnel at a different endpoint
    pub fn with_remote(mut self, remote: Endpoint) -> Self {
        self.remote = remote;
        self
    }

    /// Per-direction chunk buffer for the relay loop
    pub fn relay_buffer_size(&self) -> usize {
        DEFAULT_RELAY_BUFFER.max(self.mtu as usize)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(ConfigError::InvalidMtu(self.mtu));
        }

        let max = max_prefix(&self.address);
        if self.prefix_len > max {
            return Err(ConfigError::InvalidPrefix {
                prefix: self.prefix_len,
                max,
            });
        }

        for route in &self.routes {
            route.validate()?;
            if route.addr.is_ipv4() != self.address.is_ipv4() {
                return Err(ConfigError::AddressFamilyMismatch(*route));
            }
        }

        self.remote.validate()
    }

    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Export as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("MTU {0} is outside 576..=65507")]
    InvalidMtu(u16),

    #[error("Prefix length {prefix} exceeds {max}")]
    InvalidPrefix { prefix: u8, max: u8 },

    #[error("Route {0} does not match the interface address family")]
    AddressFamilyMismatch(Route),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Remote port must be non-zero")]
    InvalidPort,

    #[error("Remote host is empty")]
    EmptyHost,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
