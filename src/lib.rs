//! FTM Multilateration
//!
//! Indoor tag positioning from Wi-Fi Fine Timing Measurement ranges.
//! Readings from fixed anchors are aggregated into complete measurement
//! sets, queued, and solved in the background with a Levenberg-Marquardt
//! least-squares fit into an append-only position log.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod utils;
pub mod api;

// Re-export commonly used types
pub use crate::core::{Anchor, AnchorTopology, Measurement, MeasurementSet, Position};
pub use crate::algorithms::{LevenbergMarquardtSolver, MirrorSide, PositionSolver, Solution};
pub use crate::processing::{MeasurementAggregator, PositionLog, ReportParser, StopMode, WorkQueue, WorkerReport};
pub use crate::validation::{ErrorReporter, PositioningError};
pub use crate::utils::{ConfigError, SolverConfig, SystemConfig};
pub use crate::api::{ApiError, ApiResult, EngineStatus, OutputFormat, PositionFormatter, PositioningEngine, SubmitStatus};
