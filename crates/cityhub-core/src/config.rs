//! Configuration system for the cityhub gateway.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CITYHUB_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cityhub/config.toml
//!   3. ~/.config/cityhub/config.toml

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::{
    DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT, DEFAULT_DISCOVERY_PORT, DEFAULT_MULTICAST_GROUP,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub gateway: GatewayConfig,
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub dispatch: DispatchConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Origin id stamped on envelopes the gateway sends.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address all three listeners bind to.
    pub bind_addr: Ipv4Addr,
    /// Discovery multicast group.
    pub multicast_group: Ipv4Addr,
    /// Local interface used to join the group. 0.0.0.0 = let the OS choose.
    pub multicast_interface: Ipv4Addr,
    /// UDP port of the discovery group. 0 = OS-assigned.
    pub discovery_port: u16,
    /// UDP port for DADOS. 0 = OS-assigned.
    pub data_port: u16,
    /// TCP port for control sessions. 0 = OS-assigned.
    pub control_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// DISCOVERY broadcasts sent after startup. 0 = none.
    pub attempts: u32,
    /// Delay between the first and second attempt.
    pub initial_delay_ms: u64,
    /// Each following delay is the previous one times this factor.
    pub backoff_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bound on connecting to a device and sending one command.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// A session whose write stalls longer than this is dropped.
    pub write_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: "gateway".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            data_port: DEFAULT_DATA_PORT,
            control_port: DEFAULT_CONTROL_PORT,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 2000,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ControlConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("cityhub")
}

fn home_dir() -> PathBuf {
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HubConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file, or return defaults if it does not exist.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(HubConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CITYHUB_CONFIG")
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
            let text = toml::to_string_pretty(&HubConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CITYHUB_* overrides. `lookup` resolves a variable name; values
    /// that fail to parse are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CITYHUB_GATEWAY__ID") {
            self.gateway.id = v;
        }
        if let Some(Ok(a)) = lookup("CITYHUB_NETWORK__BIND_ADDR").map(|v| v.parse::<Ipv4Addr>()) {
            self.network.bind_addr = a;
        }
        if let Some(Ok(a)) = lookup("CITYHUB_NETWORK__MULTICAST_GROUP").map(|v| v.parse::<Ipv4Addr>()) {
            self.network.multicast_group = a;
        }
        if let Some(Ok(p)) = lookup("CITYHUB_NETWORK__DISCOVERY_PORT").map(|v| v.parse::<u16>()) {
            self.network.discovery_port = p;
        }
        if let Some(Ok(p)) = lookup("CITYHUB_NETWORK__DATA_PORT").map(|v| v.parse::<u16>()) {
            self.network.data_port = p;
        }
        if let Some(Ok(p)) = lookup("CITYHUB_NETWORK__CONTROL_PORT").map(|v| v.parse::<u16>()) {
            self.network.control_port = p;
        }
        if let Some(Ok(n)) = lookup("CITYHUB_DISCOVERY__ATTEMPTS").map(|v| v.parse::<u32>()) {
            self.discovery.attempts = n;
        }
        if let Some(Ok(ms)) = lookup("CITYHUB_DISPATCH__TIMEOUT_MS").map(|v| v.parse::<u64>()) {
            self.dispatch.timeout_ms = ms;
        }
    }
}
