//! tether-cli: Command-line interface for tether
//!
//! Provides the `tether` binary: bootstrap a host and run a command on
//! it, check that a host answers, inspect the package that would be sent,
//! and manage the configuration file.

pub mod backoff;
pub mod commands;
pub mod output;
