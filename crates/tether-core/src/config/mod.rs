//! Configuration management for tether

mod bootstrap;
mod retry;
pub mod serde_utils;
mod transport;

pub use bootstrap::{default_modules, BootstrapConfig, ModuleSource, AGENT_BINARY};
pub use retry::BackoffConfig;
pub use transport::{HostProfile, TransportConfig, TransportKind};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Everything the caller side needs to bootstrap a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Transport process settings
    pub transport: TransportConfig,

    /// Handshake limits and entry point arguments
    pub bootstrap: BootstrapConfig,

    /// Package modules in load order; the last one is the entry point
    pub modules: Vec<ModuleSource>,

    /// Retry policy for the CLI
    pub backoff: BackoffConfig,

    /// Known hosts by alias
    pub hosts: HashMap<String, HostProfile>,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            bootstrap: BootstrapConfig::default(),
            modules: default_modules(),
            backoff: BackoffConfig::default(),
            hosts: HashMap::new(),
        }
    }
}

impl TetherConfig {
    /// Load from `path`, or from the default path if none is given
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = match path {
            Some(path) => load_config(path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    load_config(&path)?
                } else {
                    tracing::debug!("No config at {}, using defaults", path.display());
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::Invalid("at least one module is required".to_string()));
        }
        if self.bootstrap.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid("bootstrap.handshake_timeout must be positive".to_string()));
        }
        if self.bootstrap.max_noise_bytes == 0 {
            return Err(ConfigError::Invalid("bootstrap.max_noise_bytes must be positive".to_string()));
        }
        if self.transport.kind == TransportKind::Command && self.transport.command.is_empty() {
            return Err(ConfigError::Invalid(
                "transport.command is required for the command transport".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) || self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff needs jitter in 0..=1 and multiplier >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a host alias, or treat `name` as an address
    ///
    /// Unset port and user fall back to the transport defaults.
    pub fn target(&self, name: &str) -> HostProfile {
        let mut profile = self
            .hosts
            .get(name)
            .cloned()
            .unwrap_or_else(|| HostProfile::new(name));
        if profile.port.is_none() {
            profile.port = self.transport.port;
        }
        if profile.user.is_none() {
            profile.user = self.transport.user.clone();
        }
        profile
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}
