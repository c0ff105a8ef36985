//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A bootstrap package must carry at least one module
    #[error("Bootstrap package has no modules")]
    EmptyPackage,

    /// Module name unusable as a remote file name
    #[error("Invalid module name {0:?}: use only [A-Za-z0-9._-]")]
    InvalidModuleName(String),

    /// Two modules share a name
    #[error("Duplicate module name: {0}")]
    DuplicateModule(String),

    /// Session key text was not 64 hex characters
    #[error("Invalid session key: {0}")]
    InvalidKey(String),

    /// A frame's tag did not match the running MAC
    #[error("Frame failed authentication")]
    FrameAuthentication,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
