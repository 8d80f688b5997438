//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
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

/// Format a load or energy amount
pub fn format_amount(value: f64) -> String {
    format!("{:.2}", value)
}

/// Format an efficiency ratio as a percentage
pub fn format_efficiency(efficiency: f64) -> String {
    format!("{:.0}%", efficiency * 100.0)
}

/// Usage as a share of capacity
pub fn format_utilization(usage: f64, capacity: f64) -> String {
    if capacity <= 0.0 {
        return "-".to_string();
    }
    format!("{:.1}%", usage / capacity * 100.0)
}

/// Color model state based on value
pub fn color_state(state: &str) -> String {
    match state.to_lowercase().as_str() {
        "trained" => state.green().to_string(),
        "untrained" => state.yellow().to_string(),
        _ => state.to_string(),
    }
}

/// Highlight allocations that received no load
pub fn color_allocated(load: f64) -> String {
    let formatted = format_amount(load);
    if load > 0.0 {
        formatted.green().to_string()
    } else {
        formatted.dimmed().to_string()
    }
}
