//! Output formatting for the oscillate CLI (table, json)

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Section title, table output only
    pub fn header(&self, title: &str) {
        if !self.is_json() {
            println!("{}", title.bold());
            println!("{}", "=".repeat(40));
        }
    }

    /// Print a success message
    pub fn success(&self, msg: &str) {
        if !self.is_json() {
            println!("{} {}", "✓".green(), msg.green());
        }
    }

    /// Print an info message
    pub fn info(&self, msg: &str) {
        if !self.is_json() {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{} {}", "✗".red(), msg.red());
    }

    /// Print rows in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    println!("No data");
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => print_json(&data),
        }
    }

    /// Print key-value pairs (info, stats)
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                print_json(&map);
            }
        }
    }
}

/// Pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
    );
}

/// Result of one `diagnose` check
#[derive(Debug, Tabled, Serialize)]
pub struct CheckRow {
    #[tabled(rename = "Check")]
    pub check: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Details")]
    pub details: String,
}

impl CheckRow {
    pub fn new(check: &str, ok: bool, details: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            status: if ok { "ok" } else { "missing" }.to_string(),
            details: details.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Top track display for stats command
#[derive(Debug, Tabled, Serialize)]
pub struct TopTrackRow {
    #[tabled(rename = "#")]
    pub rank: usize,
    #[tabled(rename = "Title")]
    pub title: String,
    #[tabled(rename = "Plays")]
    pub plays: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_row_status() {
        assert!(CheckRow::new("ffmpeg", true, "6.1").is_ok());

        let missing = CheckRow::new("opus", false, "");
        assert_eq!(missing.status, "missing");
        assert!(!missing.is_ok());
    }

    #[test]
    fn test_format_names() {
        assert_eq!(
            serde_json::to_string(&OutputFormat::Json).unwrap(),
            "\"json\""
        );
        assert_eq!(
            OutputFormat::from_str("table", true).unwrap(),
            OutputFormat::Table
        );
    }
}
