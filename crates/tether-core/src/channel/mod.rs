//! Channel adapters
//!
//! `StreamChannel` adapts any async read half and write half into a
//! [`Channel`](crate::traits::Channel). The aliases below name the three
//! places it is used: a spawned transport process, the agent's own stdio
//! (where input and output are reversed relative to the local side), and
//! a TCP socket.

mod framed;
mod stream;

pub use framed::FramedChannel;
pub use stream::{ChannelCloser, StreamChannel};

use tokio::io::{Stdin, Stdout};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{ChildStdin, ChildStdout};

/// Channel over a spawned transport process (we read its stdout, write its stdin)
pub type ProcessChannel = StreamChannel<ChildStdout, ChildStdin>;

/// Channel over this process's own stdin/stdout
pub type StdioChannel = StreamChannel<Stdin, Stdout>;

/// Channel over a TCP socket
pub type TcpChannel = StreamChannel<OwnedReadHalf, OwnedWriteHalf>;
