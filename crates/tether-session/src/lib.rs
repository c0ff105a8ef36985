//! tether-session: The two roles of a bootstrapped connection
//!
//! Both roles are chains of [`Session`](tether_core::Session) states run
//! by [`drive`](tether_core::drive). The client proves the session key,
//! issues one request (run a command or ping) and says goodbye; the
//! server checks the proof and serves requests until the client leaves.

pub mod client;
pub mod exec;
pub mod server;

pub use client::{Client, ClientReport, ExecRequest, OutputSink, RemoteInfo, Request};
pub use server::{Server, ServerInfo};
