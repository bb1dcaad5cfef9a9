//! Relay Server Catalog
//!
//! The list of relay endpoints a presenter can offer, and the mapping
//! from a selected server to a [`TunnelConfig`]. Rendering the list is
//! the presenter's business; this module only stores and resolves it.
//!
//! # Default servers
//!
//! | Id | Country | Endpoint |
//! |----|---------|----------|
//! | 1 | US | 104.16.123.96 |
//! | 2 | GB | 104.16.132.229 |
//! | 3 | DE | 104.18.32.167 |
//! | 4 | JP | 104.18.40.119 |
//! | 5 | SG | 104.18.45.67 |
//! | 6-8 | CA, FR, AU | 1.1.1.1 |

use crate::config::{ConfigError, Endpoint, TunnelConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Port relay servers listen on unless a profile says otherwise
pub const DEFAULT_SERVER_PORT: u16 = 443;

/// Endpoint used for countries without a dedicated relay
pub const FALLBACK_ENDPOINT: &str = "1.1.1.1";

/// Relay address for a country code
pub fn country_endpoint(country: &str) -> &'static str {
    match country.to_uppercase().as_str() {
        "US" => "104.16.123.96",
        "GB" => "104.16.132.229",
        "DE" => "104.18.32.167",
        "JP" => "104.18.40.119",
        "SG" => "104.18.45.67",
        _ => FALLBACK_ENDPOINT,
    }
}

/// One relay server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// ISO country code
    pub country: String,
    /// Relay host; defaults to the country's relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_host: Option<String>,
    /// Relay port
    #[serde(default = "default_port")]
    pub endpoint_port: u16,
    /// Advertised round-trip time (ms)
    #[serde(default)]
    pub ping_ms: u32,
    /// Premium-only server
    #[serde(default)]
    pub premium: bool,
    /// Is this server offered?
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_true() -> bool {
    true
}

impl ServerProfile {
    /// Create a profile on the default port, resolved by country
    pub fn new(id: &str, name: &str, country: &str, ping_ms: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            country: country.to_string(),
            endpoint_host: None,
            endpoint_port: DEFAULT_SERVER_PORT,
            ping_ms,
            premium: false,
            enabled: true,
        }
    }

    /// Mark as premium
    pub fn premium(mut self) -> Self {
        self.premium = true;
        self
    }

    /// Relay endpoint for this server
    pub fn endpoint(&self) -> Endpoint {
        let host = match &self.endpoint_host {
            Some(host) => host.clone(),
            None => country_endpoint(&self.country).to_string(),
        };
        Endpoint::new(host, self.endpoint_port)
    }

    /// Build a tunnel config pointing at this server
    ///
    /// Interface settings are taken from `base`.
    pub fn to_tunnel_config(&self, base: &TunnelConfig) -> Result<TunnelConfig, CatalogError> {
        let config = base.clone().with_remote(self.endpoint());
        config.validate()?;
        Ok(config)
    }
}

/// Server catalog file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCatalog {
    /// All server profiles, in display order
    pub servers: Vec<ServerProfile>,
}

impl ServerCatalog {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        toml::from_str(content)
            .map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(content)
            .map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Built-in server list
    pub fn default_catalog() -> Self {
        Self {
            servers: vec![
                ServerProfile::new("1", "United States", "US", 12),
                ServerProfile::new("2", "United Kingdom", "GB", 45),
                ServerProfile::new("3", "Germany", "DE", 38),
                ServerProfile::new("4", "Japan", "JP", 89),
                ServerProfile::new("5", "Singapore", "SG", 67),
                ServerProfile::new("6", "Canada", "CA", 23),
                ServerProfile::new("7", "France", "FR", 42),
                ServerProfile::new("8", "Australia", "AU", 95).premium(),
            ],
        }
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Find an enabled server by id
    pub fn find(&self, id: &str) -> Option<&ServerProfile> {
        self.servers.iter().find(|s| s.id == id && s.enabled)
    }

    /// Enabled servers, in display order
    pub fn enabled_servers(&self) -> Vec<&ServerProfile> {
        self.servers.iter().filter(|s| s.enabled).collect()
    }

    /// Server selected when the user has not picked one
    pub fn default_server(&self) -> Option<&ServerProfile> {
        self.servers.iter().find(|s| s.enabled)
    }

    /// Resolve a server id into a tunnel config
    pub fn tunnel_config(&self, id: &str, base: &TunnelConfig) -> Result<TunnelConfig, CatalogError> {
        self.find(id)
            .ok_or_else(|| CatalogError::UnknownServer(id.to_string()))?
            .to_tunnel_config(base)
    }
}

impl Default for ServerCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

/// Catalog errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown or disabled server: {0}")]
    UnknownServer(String),

    #[error("Invalid server configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_endpoint() {
        assert_eq!(country_endpoint("DE"), "104.18.32.167");
        assert_eq!(country_endpoint("jp"), "104.18.40.119");
        assert_eq!(country_endpoint("AU"), FALLBACK_ENDPOINT);
    }

    #[test]
    fn test_default_catalog() {
        let catalog = ServerCatalog::default_catalog();

        assert_eq!(catalog.servers.len(), 8);
        assert_eq!(catalog.default_server().unwrap().country, "US");
        assert!(catalog.find("8").unwrap().premium);
        assert!(catalog.servers.iter().all(|s| s.endpoint_port == DEFAULT_SERVER_PORT));
    }

    #[test]
    fn test_tunnel_config_for_server() {
        let catalog = ServerCatalog::default_catalog();
        let base = TunnelConfig::default().with_mtu(1400);

        let config = catalog.tunnel_config("3", &base).unwrap();
        assert_eq!(config.remote, Endpoint::new("104.18.32.167", 443));
        assert_eq!(config.mtu, 1400);
    }

    #[test]
    fn test_unknown_server() {
        let catalog = ServerCatalog::default_catalog();
        let result = catalog.tunnel_config("42", &TunnelConfig::default());
        assert_eq!(result, Err(CatalogError::UnknownServer("42".to_string())));
    }

    #[test]
    fn test_disabled_server_hidden() {
        let mut catalog = ServerCatalog::default_catalog();
        catalog.servers[0].enabled = false;

        assert!(catalog.find("1").is_none());
        assert_eq!(catalog.enabled_servers().len(), 7);
        assert_eq!(catalog.default_server().unwrap().id, "2");
    }

    #[test]
    fn test_from_toml_with_explicit_host() {
        let catalog = ServerCatalog::from_toml(
            r#"
            [[servers]]
            id = "lab"
            name = "Lab relay"
            country = "DE"
            endpoint_host = "relay.lab.internal"
            endpoint_port = 4500
            "#,
        )
        .unwrap();

        let server = catalog.find("lab").unwrap();
        assert_eq!(server.endpoint(), Endpoint::new("relay.lab.internal", 4500));
        assert!(server.enabled);
        assert!(!server.premium);
    }

    #[test]
    fn test_toml_export_reloads() {
        let catalog = ServerCatalog::default_catalog();
        assert_eq!(ServerCatalog::from_toml(&catalog.to_toml()).unwrap(), catalog);
    }
}
