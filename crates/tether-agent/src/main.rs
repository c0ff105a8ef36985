//! tether remote agent
//!
//! Started by the bootstrap loader as `tether-agent serve`. Its stdout is
//! the data channel, so all logging goes to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_agent::{hostname, peer_from_env, resolve_key, serve_stdio, Listener};
use tether_protocol::SessionKey;
use tether_session::ServerInfo;

#[derive(Parser)]
#[command(name = "tether-agent")]
#[command(about = "tether remote runtime")]
#[command(version)]
struct Args {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve one session over stdin/stdout (the loader's entry point)
    Serve,

    /// Serve sessions over TCP
    Listen {
        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:7420")]
        bind: String,

        /// Session key (64 hex chars); generated and printed if absent
        #[arg(long, env = "TETHER_SESSION_KEY", hide_env_values = true)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Serve => {
            let key = resolve_key(None).context("serve is started by the bootstrap loader")?;
            let outcome = serve_stdio(key, peer_from_env()).await?;
            tracing::debug!("Session finished: {:?}", outcome);
        }
        Command::Listen { bind, key } => {
            let key = match key {
                Some(text) => resolve_key(Some(&text))?,
                None => {
                    let key = SessionKey::generate();
                    println!("{}", key.expose());
                    key
                }
            };

            let listener = Listener::bind(&bind, key, ServerInfo::new(hostname())).await?;
            let cancel = listener.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted");
                    cancel.cancel();
                }
            });
            listener.run().await;
        }
    }

    Ok(())
}
