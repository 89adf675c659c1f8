//! Ingestion, queueing and background solving

pub mod aggregator;
pub mod parser;
pub mod position_log;
pub mod queue;
pub mod worker;

pub use aggregator::{AggregatorStats, IngestStatus, MeasurementAggregator};
pub use parser::{ParseError, RangeReport, ReportParser};
pub use position_log::PositionLog;
pub use queue::{EnqueueOutcome, OverflowPolicy, QueueConfig, QueueReceiver, WorkQueue};
pub use worker::{SolverWorker, StopMode, WorkerHandle, WorkerReport};
