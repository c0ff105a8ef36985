//! Output formatting utilities for the CLI
//!
//! Tables for packages, human-readable sizes and durations, and colored
//! status messages.

use std::time::Duration;

use tabled::{settings::Style, Table, Tabled};
use tether_protocol::BootstrapPackage;
use tether_session::ClientReport;

/// Format a package's modules as an ASCII table, entry point last
pub fn format_package(package: &BootstrapPackage) -> String {
    #[derive(Tabled)]
    struct ModuleRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "MODULE")]
        name: String,
        #[tabled(rename = "SIZE")]
        original: String,
        #[tabled(rename = "COMPRESSED")]
        compressed: String,
        #[tabled(rename = "ROLE")]
        role: &'static str,
    }

    let modules = package.modules();
    let rows: Vec<ModuleRow> = modules
        .iter()
        .enumerate()
        .map(|(i, m)| ModuleRow {
            index: i + 1,
            name: m.name().to_string(),
            original: format_bytes(m.original_len()),
            compressed: format_bytes(m.len()),
            role: if i + 1 == modules.len() { "entry" } else { "staged" },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format what a session learned about the remote host
pub fn format_report(report: &ClientReport) -> String {
    let mut output = String::new();

    match &report.remote {
        Some(remote) => {
            output.push_str(&format!("Host: {}\n", remote.hostname));
            output.push_str(&format!("Platform: {}/{}\n", remote.os, remote.arch));
            output.push_str(&format!("Protocol: {}\n", remote.version));
        }
        None => output.push_str("Host: unknown\n"),
    }
    if let Some(rtt) = report.round_trip {
        output.push_str(&format!("Round trip: {}\n", format_duration(rtt)));
    }

    output
}

/// Format a byte count in binary units
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Format a short duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::BootstrapModule;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn test_format_package_marks_entry() {
        let package = BootstrapPackage::build(vec![
            BootstrapModule::new("helpers", &b"echo helper"[..]),
            BootstrapModule::new("main", &b"echo main"[..]),
        ])
        .unwrap();

        let table = format_package(&package);
        assert!(table.contains("helpers"));
        assert!(table.contains("staged"));
        let main_line = table.lines().find(|l| l.contains("main")).unwrap();
        assert!(main_line.contains("entry"));
    }

    #[test]
    fn test_format_report_without_remote() {
        let report = ClientReport::default();
        assert_eq!(format_report(&report), "Host: unknown\n");
    }
}
