//! Engine-facing API
//!
//! [`PositioningEngine`] is what a transport layer feeds readings into and
//! what a presentation layer reads the position log from.

pub mod engine;
pub mod formatting;
pub mod types;

pub use engine::PositioningEngine;
pub use formatting::{
    format_timestamp, CsvFormatter, JsonFormatter, LogEntry, OutputFormat, PositionData, PositionFormatter,
    TextFormatter,
};
pub use types::{ApiError, ApiResult, EngineStatus, SubmitStatus};
