//! Message types for the tether session protocol
//!
//! These messages flow over the channel once the bootstrap package has
//! been delivered and the remote entry point is running. They are
//! serialized into frames by the codec in `codec.rs`.
//!
//! # Message Flow
//!
//! 1. Client sends `Hello` carrying a proof of the session key
//! 2. Server answers `Welcome` with its own nonce (or `Rejected` and hangs
//!    up); every later frame in either direction carries a MAC tag
//! 3. Client sends requests: `Exec` is answered by any number of
//!    `Stdout`/`Stderr` chunks followed by `Exited`; `Heartbeat` is
//!    answered by `HeartbeatAck`
//! 4. Client sends `Goodbye`; the server's run loop ends

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Current protocol version string.
///
/// Format: "MAJOR.MINOR" where MAJOR changes indicate breaking changes.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client greeting with key proof
    Hello = 0x01,
    /// Server accepted the client
    Welcome = 0x02,
    /// Server refused the client
    Rejected = 0x03,
    /// Run a command on the remote host
    Exec = 0x04,
    /// Command standard output
    Stdout = 0x05,
    /// Command standard error
    Stderr = 0x06,
    /// Command finished
    Exited = 0x07,
    /// Heartbeat ping
    Heartbeat = 0x08,
    /// Heartbeat acknowledgment
    HeartbeatAck = 0x09,
    /// Orderly end of session
    Goodbye = 0x0A,
    /// Error response
    Error = 0xFF,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Welcome),
            0x03 => Some(Self::Rejected),
            0x04 => Some(Self::Exec),
            0x05 => Some(Self::Stdout),
            0x06 => Some(Self::Stderr),
            0x07 => Some(Self::Exited),
            0x08 => Some(Self::Heartbeat),
            0x09 => Some(Self::HeartbeatAck),
            0x0A => Some(Self::Goodbye),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown error
    Unknown = 0,
    /// The requested command could not be started
    ExecFailed = 1,
    /// Message not valid in the receiver's current state
    InvalidMessage = 2,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Client greeting
    Hello {
        /// Protocol version (use `PROTOCOL_VERSION`)
        version: String,
        /// Client-chosen nonce, hex-encoded
        nonce: String,
        /// `SessionKey::proof(nonce)`
        proof: String,
    },

    /// Server accepted the greeting
    Welcome {
        /// Server protocol version
        version: String,
        /// Server-chosen nonce, hex-encoded; seeds the frame MACs
        nonce: String,
        /// Hostname of the remote machine
        hostname: String,
        /// Operating system (e.g., "linux", "macos")
        os: String,
        /// CPU architecture (e.g., "x86_64", "aarch64")
        arch: String,
    },

    /// Server refused the greeting
    Rejected {
        /// Human-readable reason
        reason: String,
    },

    /// Run a command
    Exec {
        /// Program and arguments
        argv: Vec<String>,
        /// Extra environment variables
        env: Vec<(String, String)>,
        /// Working directory (None = agent's)
        cwd: Option<String>,
    },

    /// Standard output chunk
    Stdout(Bytes),

    /// Standard error chunk
    Stderr(Bytes),

    /// Command finished
    Exited {
        /// Exit code, None if killed by a signal
        code: Option<i32>,
    },

    /// Heartbeat ping
    Heartbeat {
        /// Timestamp for latency measurement
        timestamp: u64,
    },

    /// Heartbeat acknowledgment
    HeartbeatAck {
        /// Echo of the original timestamp
        timestamp: u64,
    },

    /// Orderly end of session
    Goodbye,

    /// Error response
    Error {
        /// Error code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello { .. } => MessageType::Hello,
            Message::Welcome { .. } => MessageType::Welcome,
            Message::Rejected { .. } => MessageType::Rejected,
            Message::Exec { .. } => MessageType::Exec,
            Message::Stdout(_) => MessageType::Stdout,
            Message::Stderr(_) => MessageType::Stderr,
            Message::Exited { .. } => MessageType::Exited,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::HeartbeatAck { .. } => MessageType::HeartbeatAck,
            Message::Goodbye => MessageType::Goodbye,
            Message::Error { .. } => MessageType::Error,
        }
    }
}
