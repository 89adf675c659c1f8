//! Position log output formatting and serialization
//!
//! The JSON form keeps the shape of the original `/logs` endpoint
//! (`macs`, `distances`, `position`, `timestamp`) with the residual and
//! sequence number added.

use crate::core::types::{AnchorId, Position};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Text,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "text" | "txt" => Ok(OutputFormat::Text),
            other => Err(format!("unknown output format '{}' (expected json, csv or text)", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One log entry as served to presentation layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub macs: Vec<AnchorId>,
    pub distances: Vec<f64>,
    pub position: PositionData,
    pub mean_absolute_residual: f64,
    /// UTC, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
}

/// Render epoch milliseconds as a UTC wall-clock string
pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

impl From<&Position> for LogEntry {
    fn from(p: &Position) -> Self {
        Self {
            sequence: p.sequence,
            macs: p.anchor_ids.clone(),
            distances: p.distances.clone(),
            position: PositionData { x: p.x, y: p.y, z: p.z },
            mean_absolute_residual: p.mean_absolute_residual,
            timestamp: format_timestamp(p.timestamp_ms),
        }
    }
}

/// Rounds coordinates before rendering
#[derive(Debug, Clone)]
pub struct PositionFormatter {
    pub format: OutputFormat,
    /// Decimal places kept for coordinates and the residual
    pub precision: u8,
    pub pretty: bool,
}

impl Default for PositionFormatter {
    fn default() -> Self {
        Self {
            format: OutputFormat::Json,
            precision: 3,
            pretty: false,
        }
    }
}

impl PositionFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn entry(&self, position: &Position) -> LogEntry {
        let mut entry = LogEntry::from(position);
        entry.position.x = self.round_to_precision(entry.position.x);
        entry.position.y = self.round_to_precision(entry.position.y);
        entry.position.z = self.round_to_precision(entry.position.z);
        entry.mean_absolute_residual = self.round_to_precision(entry.mean_absolute_residual);
        entry
    }

    /// Render the whole log in the configured format
    pub fn format_log(&self, positions: &[Position]) -> Result<String, serde_json::Error> {
        let entries: Vec<LogEntry> = positions.iter().map(|p| self.entry(p)).collect();
        match self.format {
            OutputFormat::Json => JsonFormatter { pretty: self.pretty }.format_json(&entries),
            OutputFormat::Csv => Ok(CsvFormatter::new().format_csv(&entries)),
            OutputFormat::Text => Ok(TextFormatter::new().format_text(&entries)),
        }
    }

    fn round_to_precision(&self, value: f64) -> f64 {
        let multiplier = 10f64.powi(self.precision as i32);
        (value * multiplier).round() / multiplier
    }
}

/// JSON array of log entries
#[derive(Debug, Default)]
pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format_json(&self, entries: &[LogEntry]) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(entries)
        } else {
            serde_json::to_string(entries)
        }
    }
}

/// CSV for data logging; multi-valued columns are `;`-separated
#[derive(Debug)]
pub struct CsvFormatter {
    pub include_header: bool,
}

impl Default for CsvFormatter {
    fn default() -> Self {
        Self { include_header: true }
    }
}

impl CsvFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> String {
        "sequence,timestamp,x,y,z,mean_absolute_residual,macs,distances".to_string()
    }

    pub fn format_row(&self, entry: &LogEntry) -> String {
        let distances: Vec<String> = entry.distances.iter().map(|d| d.to_string()).collect();
        format!(
            "{},{},{},{},{},{},{},{}",
            entry.sequence,
            entry.timestamp,
            entry.position.x,
            entry.position.y,
            entry.position.z,
            entry.mean_absolute_residual,
            entry.macs.join(";"),
            distances.join(";")
        )
    }

    pub fn format_csv(&self, entries: &[LogEntry]) -> String {
        let mut output = String::new();
        if self.include_header {
            output.push_str(&self.header());
            output.push('\n');
        }
        for entry in entries {
            output.push_str(&self.format_row(entry));
            output.push('\n');
        }
        output
    }
}

/// Human-readable text formatter
#[derive(Debug, Default)]
pub struct TextFormatter {
    /// One line per entry instead of a block
    pub compact: bool,
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compact() -> Self {
        Self { compact: true }
    }

    pub fn format_entry(&self, entry: &LogEntry) -> String {
        let PositionData { x, y, z } = entry.position;
        if self.compact {
            return format!(
                "#{} {} ({:.3}, {:.3}, {:.3}) res {:.3} m",
                entry.sequence, entry.timestamp, x, y, z, entry.mean_absolute_residual
            );
        }

        let mut output = format!("Position #{} at {}\n", entry.sequence, entry.timestamp);
        output.push_str(&format!("  x: {:.3} m\n", x));
        output.push_str(&format!("  y: {:.3} m\n", y));
        output.push_str(&format!("  z: {:.3} m\n", z));
        output.push_str(&format!("  Mean residual: {:.3} m\n", entry.mean_absolute_residual));
        output.push_str("  Ranges:\n");
        for (mac, distance) in entry.macs.iter().zip(&entry.distances) {
            output.push_str(&format!("    {}  {:.3} m\n", mac, distance));
        }
        output
    }

    pub fn format_text(&self, entries: &[LogEntry]) -> String {
        if entries.is_empty() {
            return "No positions solved\n".to_string();
        }
        let mut output = String::new();
        for entry in entries {
            output.push_str(&self.format_entry(entry));
            output.push('\n');
        }
        output
    }
}
