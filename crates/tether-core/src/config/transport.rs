//! Transport and host configuration

use serde::{Deserialize, Serialize};

/// Which kind of process carries the bootstrap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `ssh [options] [user@]host <remote command>`
    #[default]
    Ssh,
    /// `sh -c <script>` on this machine
    Local,
    /// A configured argv with the remote command appended
    Command,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ssh => write!(f, "ssh"),
            TransportKind::Local => write!(f, "local"),
            TransportKind::Command => write!(f, "command"),
        }
    }
}

/// How to spawn the transport process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport kind
    pub kind: TransportKind,

    /// Program for the ssh transport
    pub program: String,

    /// Options placed before the destination
    pub extra_args: Vec<String>,

    /// Default port when a host does not set one
    pub port: Option<u16>,

    /// Default login user when a host does not set one
    pub user: Option<String>,

    /// Argv for the command transport
    pub command: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Ssh,
            program: "ssh".to_string(),
            // Prompts would stall the handshake until it times out
            extra_args: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            port: None,
            user: None,
            command: Vec::new(),
        }
    }
}

/// A known host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    /// Address handed to the transport
    pub host: String,

    /// Port override
    #[serde(default)]
    pub port: Option<u16>,

    /// Login user override
    #[serde(default)]
    pub user: Option<String>,

    /// Options appended after the transport's own extra args
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl HostProfile {
    /// Profile with just an address
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// `user@host` when a user is set, otherwise the bare host
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}
