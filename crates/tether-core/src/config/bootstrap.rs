//! Bootstrap limits and module sources

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Name of the agent binary installed next to the CLI
pub const AGENT_BINARY: &str = "tether-agent";

/// Limits and entry point arguments for one bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// How long to wait for the handshake signature
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Transport output tolerated before the signature
    pub max_noise_bytes: usize,

    /// Arguments for the entry point module
    pub entry_args: Vec<String>,

    /// Transport stderr lines kept for error reports
    pub stderr_tail_lines: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            max_noise_bytes: 64 * 1024,
            entry_args: vec!["serve".to_string()],
            stderr_tail_lines: 20,
        }
    }
}

/// One module of the bootstrap package, read from disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSource {
    /// File name in the remote staging directory
    pub name: String,

    /// Local file holding the module
    pub path: PathBuf,
}

impl ModuleSource {
    /// Create a module source
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// The agent binary installed alongside the running executable
pub fn default_modules() -> Vec<ModuleSource> {
    let dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    vec![ModuleSource::new(AGENT_BINARY, dir.join(AGENT_BINARY))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.max_noise_bytes, 65536);
        assert_eq!(config.entry_args, vec!["serve"]);
    }

    #[test]
    fn test_partial_toml() {
        let config: BootstrapConfig = toml::from_str("handshake_timeout = 5").unwrap();
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.stderr_tail_lines, 20);
    }

    #[test]
    fn test_default_module_is_agent() {
        let modules = default_modules();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, AGENT_BINARY);
        assert!(modules[0].path.ends_with(AGENT_BINARY));
    }
}
