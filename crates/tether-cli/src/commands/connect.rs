//! Reaching a serving runtime
//!
//! Either bootstrap one on a host through the configured transport,
//! retrying with backoff, or connect to an agent already listening on TCP.

use std::time::Duration;

use anyhow::{Context, Result};
use tether_bootstrap::{Bootstrapped, Bootstrapper, StderrTail};
use tether_core::config::TetherConfig;
use tether_core::{Channel, TcpChannel};
use tether_protocol::SessionKey;

use crate::backoff::{is_retryable, ExponentialBackoff};
use crate::output::print_warning;

/// How long to wait for transport stderr after a session
const STDERR_SETTLE: Duration = Duration::from_millis(200);

/// Where the session runs
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Bootstrap the runtime on a host alias or address
    Bootstrap { host: String, retries: u32 },
    /// An agent already running `listen`
    Tcp { address: String, key: String },
}

/// A channel to a serving runtime and the key it expects
pub struct Connected {
    pub channel: Box<dyn Channel>,
    pub key: SessionKey,
    pub stderr: StderrTail,
}

/// Collect any transport stderr left after a session
pub async fn drain_stderr(mut stderr: StderrTail) {
    let lines = stderr.finish(STDERR_SETTLE).await;
    if !lines.is_empty() {
        tracing::debug!("Transport wrote {} stderr lines", lines.len());
    }
}

/// Open a channel to `endpoint`
pub async fn connect(config: &TetherConfig, endpoint: &Endpoint) -> Result<Connected> {
    match endpoint {
        Endpoint::Tcp { address, key } => {
            let key = SessionKey::parse(key).context("Invalid --key")?;
            let channel = TcpChannel::connect(address)
                .await
                .with_context(|| format!("Failed to connect to {}", address))?;
            Ok(Connected {
                channel: Box::new(channel),
                key,
                stderr: StderrTail::empty(),
            })
        }
        Endpoint::Bootstrap { host, retries } => {
            let bootstrapper =
                Bootstrapper::from_config(config).context("Failed to build bootstrap package")?;
            let bootstrapped = bootstrap_with_retries(&bootstrapper, config, host, *retries).await?;
            Ok(Connected {
                channel: bootstrapped.channel,
                key: bootstrapped.key,
                stderr: bootstrapped.stderr,
            })
        }
    }
}

async fn bootstrap_with_retries(
    bootstrapper: &Bootstrapper,
    config: &TetherConfig,
    host: &str,
    retries: u32,
) -> Result<Bootstrapped> {
    let target = config.target(host);
    let mut backoff = ExponentialBackoff::from_config(&config.backoff);
    let mut attempt = 0;

    loop {
        match bootstrapper.bootstrap(&target).await {
            Ok(bootstrapped) => return Ok(bootstrapped),
            Err(e) if attempt < retries && is_retryable(&e) => {
                attempt += 1;
                let delay = backoff.next_delay();
                print_warning(&format!(
                    "Bootstrap of {} failed ({}), retry {}/{} in {:.1}s",
                    target.host,
                    e,
                    attempt,
                    retries,
                    delay.as_secs_f64()
                ));
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to bootstrap {}", target.host));
            }
        }
    }
}
