//! Run command implementation

use anyhow::{Context, Result};
use tether_core::config::TetherConfig;
use tether_session::{Client, ExecRequest};

use super::connect::{connect, drain_stderr, Connected, Endpoint};

/// Exit status reported when the remote command died without a code
pub const SIGNALED_EXIT_CODE: i32 = 255;

/// What to run besides the argv
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Extra environment for the command
    pub env: Vec<(String, String)>,
    /// Working directory on the remote host
    pub cwd: Option<String>,
}

/// Run `argv` at `endpoint`, relaying its output, and return its exit code
pub async fn run_command(
    config: &TetherConfig,
    endpoint: &Endpoint,
    argv: Vec<String>,
    options: RunOptions,
) -> Result<i32> {
    let Connected {
        channel,
        key,
        stderr,
    } = connect(config, endpoint).await?;

    let mut request = ExecRequest::new(argv);
    for (key, value) in options.env {
        request = request.env(key, value);
    }
    if let Some(cwd) = options.cwd {
        request = request.cwd(cwd);
    }

    let result = Client::new(channel, key).exec(request).await;
    drain_stderr(stderr).await;

    let (outcome, report) = result.context("Remote session failed")?;
    if let Some(remote) = &report.remote {
        tracing::debug!("Ran on {} ({}/{})", remote.hostname, remote.os, remote.arch);
    }

    Ok(outcome.exit_code.unwrap_or(SIGNALED_EXIT_CODE))
}

/// Parse a `KEY=VALUE` pair
pub fn parse_env(pair: &str) -> Result<(String, String), String> {
    pair.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", pair))
}
