//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tether_core::config::{self, TetherConfig};

use crate::output::{print_error, print_info, print_success};

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Show the effective configuration
///
/// Defaults fill in whatever the file leaves out.
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_path(config_path);
    let effective = TetherConfig::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;

    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_info(&format!("No configuration file at {:?}, showing defaults", path));
    }
    println!();
    println!("{}", toml::to_string_pretty(&effective)?);

    Ok(())
}

/// Print the path the configuration is read from
pub fn config_path(config_path: Option<&Path>) {
    println!("{}", resolve_path(config_path).display());
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &TetherConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));

    Ok(())
}
