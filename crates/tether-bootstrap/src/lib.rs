//! tether-bootstrap: Remote bootstrap over a spawned transport
//!
//! A [`Bootstrapper`] spawns a transport process (ssh, a local shell, or
//! any configured command) whose command argument is the loader script,
//! waits for the loader's handshake signature on the process output, then
//! streams the compressed modules. The result is a channel already
//! attached to the remote entry point, plus the session key the client
//! proves in its `Hello`.

pub mod handshake;
pub mod orchestrator;
pub mod stderr;
pub mod transport;

pub use handshake::{synchronize, HandshakeLimits, HandshakeReport};
pub use orchestrator::{Bootstrapped, Bootstrapper};
pub use stderr::StderrTail;
pub use transport::{
    transport_from_config, CommandTransport, LocalTransport, Spawned, SshTransport, Transport,
};
