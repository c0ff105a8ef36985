//! Package command implementation

use anyhow::{Context, Result};
use serde::Serialize;
use tether_core::config::TetherConfig;
use tether_protocol::BootstrapPackage;

use crate::output::{format_bytes, format_package, print_info};

#[derive(Serialize)]
struct ModuleJson<'a> {
    name: &'a str,
    size: usize,
    compressed: usize,
}

#[derive(Serialize)]
struct PackageJson<'a> {
    modules: Vec<ModuleJson<'a>>,
    entry_point: &'a str,
    total_compressed: usize,
    digest: String,
}

/// Build the configured package and describe what would be sent
pub fn package_inspect(config: &TetherConfig, json: bool) -> Result<()> {
    let package = BootstrapPackage::from_paths(
        config
            .modules
            .iter()
            .map(|m| (m.name.as_str(), m.path.as_path())),
    )
    .context("Failed to build bootstrap package")?;
    let manifest = package.manifest();

    if json {
        let body = PackageJson {
            modules: package
                .modules()
                .iter()
                .map(|m| ModuleJson {
                    name: m.name(),
                    size: m.original_len(),
                    compressed: m.len(),
                })
                .collect(),
            entry_point: &manifest.entry_point().name,
            total_compressed: manifest.total_len(),
            digest: package.digest(),
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("{}", format_package(&package));
    print_info(&format!("Entry point: {}", manifest.entry_point().name));
    print_info(&format!(
        "Transfer size: {}",
        format_bytes(manifest.total_len())
    ));
    println!("sha256 {}", package.digest());

    Ok(())
}
