//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a format name from the config file
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Red above the threshold, yellow within 10 points of it
pub fn color_percent(value: f64, threshold: f64) -> String {
    let formatted = format_percent(value);
    if value > threshold {
        formatted.red().to_string()
    } else if value > threshold - 10.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "succeeded" | "monitoring" => status.green().to_string(),
        "running" | "submitted" | "scaling" | "cooldown" | "starting" => {
            status.yellow().to_string()
        }
        "unhealthy" | "failed" | "halted" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Format timestamp for display
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
