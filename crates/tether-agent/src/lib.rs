//! tether-agent: The runtime started on the remote host
//!
//! The bootstrap loader runs this binary as its entry point with the
//! session key and peer label in the environment and the transport still
//! attached to stdin/stdout. `serve` runs one server session over that
//! stdio; `listen` accepts key-authenticated clients over TCP instead.

pub mod listener;

pub use listener::Listener;

use tether_core::{Outcome, SessionError, StdioChannel};
use tether_protocol::loader::{KEY_ENV, PEER_ENV};
use tether_protocol::{ProtocolError, SessionKey};
use tether_session::{Server, ServerInfo};
use thiserror::Error;

/// Agent failures
#[derive(Error, Debug)]
pub enum AgentError {
    /// No session key in the environment or on the command line
    #[error("No session key: set TETHER_SESSION_KEY or pass --key")]
    MissingKey,

    /// The session key is malformed
    #[error("Invalid session key: {0}")]
    InvalidKey(#[source] ProtocolError),

    /// Binding the listen address failed
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The session ended with an error
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// This host's name as reported in `Welcome`
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Parse a key given explicitly, or read it from the loader's environment
pub fn resolve_key(explicit: Option<&str>) -> Result<SessionKey, AgentError> {
    let text = match explicit {
        Some(text) => text.to_string(),
        None => std::env::var(KEY_ENV).map_err(|_| AgentError::MissingKey)?,
    };
    SessionKey::parse(&text).map_err(AgentError::InvalidKey)
}

/// Peer label set by the loader, or `stdio`
pub fn peer_from_env() -> String {
    std::env::var(PEER_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "stdio".to_string())
}

/// Serve one session over this process's stdin/stdout
pub async fn serve_stdio(key: SessionKey, peer: String) -> Result<Outcome, AgentError> {
    tracing::info!("Serving {} over stdio", peer);
    let channel = StdioChannel::stdio(peer);
    let server = Server::new(Box::new(channel), key, ServerInfo::new(hostname()));
    Ok(server.run().await?)
}
