//! tether CLI
//!
//! Bootstraps the tether runtime on a host through ssh (or another
//! configured transport) and runs commands on it.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_cli::commands::{self, parse_env, Endpoint, RunOptions};
use tether_cli::output::print_error;
use tether_core::config::TetherConfig;

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Run commands on hosts with nothing installed")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How to reach the runtime
#[derive(clap::Args)]
struct Target {
    /// Host alias from the config, or [user@]host
    #[arg(required_unless_present = "tcp")]
    host: Option<String>,

    /// Connect to `tether-agent listen` at this address instead of bootstrapping
    #[arg(long, requires = "key", conflicts_with = "host")]
    tcp: Option<String>,

    /// Session key of the listening agent
    #[arg(long, env = "TETHER_SESSION_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Bootstrap attempts to retry after a transient failure
    #[arg(long, default_value_t = 0)]
    retries: u32,
}

impl Target {
    fn endpoint(self) -> Endpoint {
        match (self.tcp, self.key) {
            (Some(address), Some(key)) => Endpoint::Tcp { address, key },
            _ => Endpoint::Bootstrap {
                host: self.host.unwrap_or_default(),
                retries: self.retries,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap a host and run a command on it
    Run {
        #[command(flatten)]
        target: Target,

        /// Set an environment variable for the command (KEY=VALUE)
        #[arg(short, long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Working directory on the remote host
        #[arg(long)]
        cwd: Option<String>,

        /// Command and arguments
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },

    /// Check that a host's runtime starts and answers
    Ping {
        #[command(flatten)]
        target: Target,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the bootstrap package
    Package {
        #[command(subcommand)]
        action: PackageAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PackageAction {
    /// List modules, sizes, and the payload digest
    Inspect {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

/// Run the chosen command and return the process exit code
async fn dispatch(cli: Cli) -> Result<i32> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            target,
            env,
            cwd,
            argv,
        } => {
            let config = TetherConfig::load(config_path)?;
            commands::run_command(&config, &target.endpoint(), argv, RunOptions { env, cwd }).await
        }

        Commands::Ping { target, json } => {
            let config = TetherConfig::load(config_path)?;
            commands::ping_command(&config, &target.endpoint(), json).await?;
            Ok(0)
        }

        Commands::Package {
            action: PackageAction::Inspect { json },
        } => {
            let config = TetherConfig::load(config_path)?;
            commands::package_inspect(&config, json)?;
            Ok(0)
        }

        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_show(config_path)?,
                ConfigAction::Path => commands::config_path(config_path),
                ConfigAction::Init { force } => commands::config_init(config_path, force)?,
            }
            Ok(0)
        }
    }
}
