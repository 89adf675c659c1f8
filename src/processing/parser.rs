use crate::core::types::Measurement;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Range report as posted by an anchor: `{"anchor_mac", "distance", "timestamp"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeReport {
    pub anchor_mac: String,
    pub distance: f64,
    /// Milliseconds
    pub timestamp: i64,
}

impl From<RangeReport> for Measurement {
    fn from(report: RangeReport) -> Self {
        Measurement::new(report.anchor_mac, report.distance, report.timestamp)
    }
}

/// Errors that can occur while decoding range reports
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Invalid report format: {details}")]
    InvalidFormat { details: String },
    #[error("Missing field '{field}'")]
    MissingField { field: &'static str },
    #[error("Field '{field}' has the wrong type: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
    #[error("Line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<ParseError>,
    },
}

/// Decodes JSON range reports into measurements.
///
/// Range plausibility is not checked here; that belongs to the solver.
#[derive(Debug, Clone, Default)]
pub struct ReportParser {
    /// Accept `timestamp` and `distance` given as numeric strings
    lenient_numbers: bool,
}

impl ReportParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lenient() -> Self {
        Self { lenient_numbers: true }
    }

    /// Parse a single JSON object
    pub fn parse_report(&self, input: &str) -> Result<RangeReport, ParseError> {
        let value: Value = serde_json::from_str(input).map_err(|e| ParseError::InvalidFormat {
            details: e.to_string(),
        })?;
        self.report_from_value(&value)
    }

    pub fn parse_measurement(&self, input: &str) -> Result<Measurement, ParseError> {
        self.parse_report(input).map(Measurement::from)
    }

    /// Parse newline-delimited reports, skipping blank lines. A top-level
    /// JSON array of reports is accepted as well.
    pub fn parse_batch(&self, input: &str) -> Result<Vec<Measurement>, ParseError> {
        let trimmed = input.trim_start();
        if trimmed.starts_with('[') {
            let values: Vec<Value> = serde_json::from_str(trimmed).map_err(|e| ParseError::InvalidFormat {
                details: e.to_string(),
            })?;
            return values
                .iter()
                .enumerate()
                .map(|(idx, value)| {
                    self.report_from_value(value)
                        .map(Measurement::from)
                        .map_err(|e| ParseError::AtLine {
                            line: idx + 1,
                            source: Box::new(e),
                        })
                })
                .collect();
        }

        input
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                self.parse_measurement(line).map_err(|e| ParseError::AtLine {
                    line: idx + 1,
                    source: Box::new(e),
                })
            })
            .collect()
    }

    fn report_from_value(&self, value: &Value) -> Result<RangeReport, ParseError> {
        let object = value.as_object().ok_or_else(|| ParseError::InvalidFormat {
            details: "expected a JSON object".to_string(),
        })?;

        let anchor_mac = match object.get("anchor_mac") {
            None | Some(Value::Null) => return Err(ParseError::MissingField { field: "anchor_mac" }),
            Some(Value::String(mac)) => mac.clone(),
            Some(_) => {
                return Err(ParseError::InvalidField {
                    field: "anchor_mac",
                    expected: "string",
                })
            }
        };

        let distance = self.number_field(object.get("distance"), "distance")?;
        let timestamp = self.integer_field(object.get("timestamp"), "timestamp")?;

        Ok(RangeReport {
            anchor_mac,
            distance,
            timestamp,
        })
    }

    fn integer_field(&self, value: Option<&Value>, field: &'static str) -> Result<i64, ParseError> {
        let wrong_type = ParseError::InvalidField {
            field,
            expected: "64-bit integer",
        };
        match value {
            None | Some(Value::Null) => Err(ParseError::MissingField { field }),
            Some(Value::Number(n)) => n.as_i64().ok_or(wrong_type),
            Some(Value::String(s)) if self.lenient_numbers => s.trim().parse::<i64>().map_err(|_| wrong_type),
            Some(_) => Err(wrong_type),
        }
    }

    fn number_field(&self, value: Option<&Value>, field: &'static str) -> Result<f64, ParseError> {
        let wrong_type = ParseError::InvalidField {
            field,
            expected: "number",
        };
        match value {
            None | Some(Value::Null) => Err(ParseError::MissingField { field }),
            Some(Value::Number(n)) => n.as_f64().ok_or(wrong_type),
            Some(Value::String(s)) if self.lenient_numbers => s.trim().parse::<f64>().map_err(|_| wrong_type),
            Some(_) => Err(wrong_type),
        }
    }
}
