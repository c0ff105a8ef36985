//! tether-core: Core abstractions and configuration for tether
//!
//! This crate provides the transport-agnostic `Channel` contract and its
//! adapters (process pipes, stdio, TCP, framed), the `Session` state
//! machine contract and driver, the error taxonomy, and the configuration
//! structures shared by the bootstrapper, the agent and the CLI.

pub mod channel;
pub mod config;
pub mod error;
pub mod time;
pub mod traits;

pub use channel::{ChannelCloser, FramedChannel, ProcessChannel, StdioChannel, StreamChannel, TcpChannel};
pub use error::{BootstrapError, ChannelError, ConfigError, ConnectionError, SessionError, TetherError};
pub use traits::{drive, Channel, Outcome, Session, Step};
