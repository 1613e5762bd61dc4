use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Gateway-wide constants
pub mod gateway {
    /// Public domain suffix the gateway serves under
    pub const DEFAULT_SUFFIX: &str = "3th.ws";

    /// Leading hostname segment that requests onion delivery
    pub const ONION_MARKER: &str = "onion";

    /// Naming-system top-level suffix appended to recovered labels
    pub const NAME_TLD: &str = "eth";

    /// File extension of a servable entry point
    pub const ENTRY_SUFFIX: &str = "html";

    /// Entry-point filename inside a directory payload
    pub const ENTRY_POINT: &str = "index.html";

    /// Public HTTPS port
    pub const DEFAULT_CLEARNET_PORT: u16 = 443;

    /// Internal port the onion-facing listener binds
    pub const DEFAULT_ONION_PORT: u16 = 3000;

    /// Virtual port hidden services expose
    pub const ONION_VIRTUAL_PORT: u16 = 80;

    /// Upper bound on certificate issuance during a TLS handshake
    pub const ISSUE_TIMEOUT_SECS: u64 = 20;

    /// Timeout for a single storage-backend fetch
    pub const FETCH_TIMEOUT_SECS: u64 = 120;

    /// Timeout for naming-backend RPC calls
    pub const RPC_TIMEOUT_SECS: u64 = 30;
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address both listeners bind
    pub listen_addr: String,

    /// Public HTTPS port
    pub clearnet_port: u16,

    /// Internal onion-facing HTTP port
    pub onion_port: u16,

    /// Domain suffix the gateway answers for
    pub gateway_suffix: String,

    /// Hostname segment that switches a request to onion delivery
    pub onion_marker: String,

    /// Naming-system TLD appended to recovered labels
    pub name_tld: String,

    /// Naming backend JSON-RPC endpoint
    pub rpc_provider: String,

    /// Storage backend HTTP API endpoint
    pub storage_api: String,

    /// Root directory for cached payloads
    pub cache_root: String,

    /// Directory holding the managed onion controller state
    pub onion_state_dir: String,

    /// Default TLS certificate chain (PEM)
    pub default_cert: String,

    /// Default TLS private key (PEM)
    pub default_key: String,

    /// Certificate issuance timeout in seconds
    pub issue_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            clearnet_port: gateway::DEFAULT_CLEARNET_PORT,
            onion_port: gateway::DEFAULT_ONION_PORT,
            gateway_suffix: gateway::DEFAULT_SUFFIX.to_string(),
            onion_marker: gateway::ONION_MARKER.to_string(),
            name_tld: gateway::NAME_TLD.to_string(),
            rpc_provider: "https://api.securerpc.com/v1".to_string(),
            storage_api: "http://127.0.0.1:5001".to_string(),
            cache_root: "./cache".to_string(),
            onion_state_dir: "./onion".to_string(),
            default_cert: "/etc/letsencrypt/live/3th.ws/fullchain.pem".to_string(),
            default_key: "/etc/letsencrypt/live/3th.ws/privkey.pem".to_string(),
            issue_timeout_secs: gateway::ISSUE_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_root(mut self, root: impl Into<String>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.gateway_suffix = suffix.into();
        self
    }

    pub fn issue_timeout(&self) -> Duration {
        Duration::from_secs(self.issue_timeout_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.clearnet_port, gateway::DEFAULT_CLEARNET_PORT);
        assert_eq!(config.gateway_suffix, "3th.ws");
        assert_eq!(config.name_tld, "eth");
    }

    #[test]
    fn test_config_builder() {
        let config = GatewayConfig::new()
            .with_cache_root("/tmp/cache")
            .with_suffix("gateway.test");

        assert_eq!(config.cache_root, "/tmp/cache");
        assert_eq!(config.gateway_suffix, "gateway.test");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = GatewayConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.clearnet_port, config.clearnet_port);
        assert_eq!(parsed.rpc_provider, config.rpc_provider);
    }
}
