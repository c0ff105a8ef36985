//! CLI command implementations

mod config;
mod connect;
mod package;
mod ping;
mod run;

pub use config::{config_init, config_path, config_show};
pub use connect::{connect, drain_stderr, Connected, Endpoint};
pub use package::package_inspect;
pub use ping::ping_command;
pub use run::{parse_env, run_command, RunOptions, SIGNALED_EXIT_CODE};
