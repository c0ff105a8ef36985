//! Core error types for tether

use std::path::PathBuf;
use std::time::Duration;

use tether_protocol::ProtocolError;
use thiserror::Error;

/// Top-level error type for the tether ecosystem
#[derive(Error, Debug)]
pub enum TetherError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Bootstrap error
    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a byte channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Operation attempted after close (or interrupted by a close)
    #[error("Channel closed")]
    Closed,

    /// Non-blocking mode and the underlying half was not ready
    #[error("Operation would block")]
    WouldBlock,

    /// The peer kept accepting zero bytes
    #[error("Channel stalled after {attempts} zero-byte writes")]
    Stalled { attempts: usize },

    /// I/O error from the underlying descriptor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The transport could not be started
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Spawning the transport process failed
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The spawned process did not expose piped stdin/stdout
    #[error("Transport process {0} has no piped stdio")]
    MissingStdio(String),

    /// Connecting a network socket failed
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while pushing the runtime to the remote host
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The transport never started
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The handshake signature was not seen in time
    #[error("Handshake signature not seen after {waited:?} ({noise_bytes} bytes of transport output)")]
    Timeout { waited: Duration, noise_bytes: usize },

    /// The transport ended its output before the signature appeared
    #[error("Transport exited before the loader started{}", format_stderr(.stderr))]
    TransportExited { stderr: Vec<String> },

    /// Reading the handshake failed
    #[error("Handshake read failed: {0}")]
    Handshake(#[source] ChannelError),

    /// Writing a module failed
    #[error("Failed to transfer module {module}: {source}")]
    Transfer {
        module: String,
        #[source]
        source: ChannelError,
    },

    /// The package could not be built
    #[error("Invalid bootstrap package: {0}")]
    Package(#[from] ProtocolError),
}

fn format_stderr(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!(": {}", lines.join(" | "))
    }
}

/// Session-level errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Channel failure
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Malformed frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer's key proof did not match
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The server refused the client
    #[error("Rejected by peer: {0}")]
    Rejected(String),

    /// A message not valid in the current state
    #[error("Unexpected {message} in state {state}")]
    UnexpectedMessage { state: &'static str, message: String },

    /// The channel ended mid-session
    #[error("Session closed unexpectedly")]
    UnexpectedClose,

    /// A remote command could not be run
    #[error("Exec failed: {0}")]
    Exec(String),

    /// Local I/O while relaying output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
