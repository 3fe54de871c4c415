use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Runtime configuration of a peer handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Network id announced in STATUS and required of the peer.
    pub network_id: u64,
    /// Headers asked per GET_BLOCK_HEADERS batch during forward sync.
    pub max_hashes_ask: u64,
    /// When set, peers are dropped right after the status exchange; the
    /// node only gathers neighbours.
    pub peer_discovery_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            max_hashes_ask: 10_000,
            peer_discovery_mode: false,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(ConfigError::Toml)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
