//! Configuration system for agromesh nodes.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $AGROMESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/agromesh/config.toml
//!   3. ~/.config/agromesh/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::NodeAddress;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgromeshConfig {
    pub node: NodeConfig,
    pub mesh: MeshConfig,
    pub radio: RadioConfig,
    pub storage: StorageConfig,
    pub uplink: UplinkConfig,
    pub api: ApiConfig,
}

/// Fixed operational mode of a node, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Aggregator: polls sensors and collects their replies.
    Controller,
    /// Data source: answers polls with local readings.
    Sensor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's own 6-character address.
    pub address: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Addresses this node knows about. A controller polls each of them;
    /// every node sizes its dedup cache from the list length.
    pub known_nodes: Vec<String>,
    /// Hop budget stamped on originated requests.
    pub ttl: u8,
    /// How long the poller waits for each node's reply.
    pub response_timeout_secs: u64,
    /// Interval between poll cycles (controller only).
    pub poll_interval_secs: u64,
    /// Maximum undrained replies held for the uplink.
    pub response_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Network interface carrying the emulated radio channel.
    pub interface: String,
    /// UDP port shared by every node on the channel.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot of the dedup cache, rewritten after every insert.
    pub dedup_path: PathBuf,
    /// Append-only JSON-lines file receiving forwarded replies.
    pub uplink_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Drain interval of the response queue.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Status API port on 127.0.0.1. 0 = disabled.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: "sn0001".to_string(),
            role: Role::Sensor,
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            known_nodes: Vec::new(),
            ttl: 3,
            response_timeout_secs: 120,
            poll_interval_secs: 300,
            response_queue_capacity: 64,
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            interface: "lo".to_string(),
            port: 9700,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dedup_path: data_dir().join("dedup.json"),
            uplink_path: data_dir().join("uplink.jsonl"),
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9780 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("agromesh")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("agromesh")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {field}: {value:?} is not a 6-character ASCII address")]
    InvalidAddress { field: &'static str, value: String },
    #[error("mesh.ttl must be at least 1")]
    ZeroTtl,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl AgromeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            AgromeshConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("AGROMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&AgromeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// This node's parsed address.
    pub fn address(&self) -> Result<NodeAddress, ConfigError> {
        self.node
            .address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                field: "node.address",
                value: self.node.address.clone(),
            })
    }

    /// The parsed known-node list, in configured order.
    pub fn known_nodes(&self) -> Result<Vec<NodeAddress>, ConfigError> {
        self.mesh
            .known_nodes
            .iter()
            .map(|s| {
                s.parse().map_err(|_| ConfigError::InvalidAddress {
                    field: "mesh.known_nodes",
                    value: s.clone(),
                })
            })
            .collect()
    }

    /// Check every field the mesh cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.address()?;
        self.known_nodes()?;
        if self.mesh.ttl == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        Ok(())
    }

    /// Apply AGROMESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AGROMESH_NODE__ADDRESS") {
            self.node.address = v;
        }
        if let Ok(v) = std::env::var("AGROMESH_NODE__ROLE") {
            match v.as_str() {
                "controller" => self.node.role = Role::Controller,
                "sensor" => self.node.role = Role::Sensor,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("AGROMESH_MESH__TTL") {
            if let Ok(t) = v.parse() {
                self.mesh.ttl = t;
            }
        }
        if let Ok(v) = std::env::var("AGROMESH_MESH__KNOWN_NODES") {
            self.mesh.known_nodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("AGROMESH_RADIO__INTERFACE") {
            self.radio.interface = v;
        }
        if let Ok(v) = std::env::var("AGROMESH_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }
}
