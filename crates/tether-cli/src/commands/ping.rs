//! Ping command implementation

use anyhow::{Context, Result};
use serde::Serialize;
use tether_core::config::TetherConfig;
use tether_session::Client;

use super::connect::{connect, drain_stderr, Connected, Endpoint};
use crate::output::{format_report, print_success};

#[derive(Serialize)]
struct PingJson {
    hostname: Option<String>,
    os: Option<String>,
    arch: Option<String>,
    version: Option<String>,
    round_trip_ms: Option<u128>,
}

/// Authenticate with the runtime at `endpoint` and time one heartbeat
pub async fn ping_command(config: &TetherConfig, endpoint: &Endpoint, json: bool) -> Result<()> {
    let Connected {
        channel,
        key,
        stderr,
    } = connect(config, endpoint).await?;

    let result = Client::new(channel, key).ping().await;
    drain_stderr(stderr).await;
    let report = result.context("Ping failed")?;

    if json {
        let remote = report.remote.as_ref();
        let body = PingJson {
            hostname: remote.map(|r| r.hostname.clone()),
            os: remote.map(|r| r.os.clone()),
            arch: remote.map(|r| r.arch.clone()),
            version: remote.map(|r| r.version.clone()),
            round_trip_ms: report.round_trip.map(|d| d.as_millis()),
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_success("Remote runtime answered");
        print!("{}", format_report(&report));
    }

    Ok(())
}
