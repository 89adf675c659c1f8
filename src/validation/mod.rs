//! Measurement validation and failure reporting

pub mod data;
pub mod error;

pub use data::DistanceValidator;
pub use error::{ErrorReport, ErrorReporter, FailureRecord, PositioningError};
