//! Common API types and data structures

use crate::core::types::AnchorId;
use crate::processing::aggregator::AggregatorStats;
use crate::processing::worker::WorkerReport;
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Engine-side errors surfaced to callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Reading from an anchor outside the configured topology
    #[error("unknown anchor '{anchor_id}'")]
    UnknownAnchor { anchor_id: AnchorId },

    #[error("solver worker is already running")]
    AlreadyRunning,

    #[error("solver worker is not running")]
    NotRunning,

    #[error("work queue is closed")]
    QueueClosed,

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("worker failure: {details}")]
    Worker { details: String },
}

/// What happened to a submitted reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStatus {
    /// Stored; the window still lacks readings
    Buffered { collected: usize, required: usize },
    /// Completed a window whose set is now queued for solving
    Queued { sequence: u64 },
    /// Queued, but only after evicting an older set from a full queue
    QueuedEvicting { sequence: u64, evicted: u64 },
    /// Completed a window but the full queue discarded the set
    Dropped { sequence: u64 },
}

impl SubmitStatus {
    /// Sequence number of the completed set, if this reading completed one
    pub fn sequence(&self) -> Option<u64> {
        match self {
            SubmitStatus::Buffered { .. } => None,
            SubmitStatus::Queued { sequence }
            | SubmitStatus::QueuedEvicting { sequence, .. }
            | SubmitStatus::Dropped { sequence } => Some(*sequence),
        }
    }
}

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub aggregator: AggregatorStats,
    /// Anchors with a reading in the open window
    pub pending_anchors: Vec<AnchorId>,
    pub queue_len: usize,
    pub queue_dropped: u64,
    pub log_len: usize,
    pub failures: u64,
    /// Counts from the running worker, or the last stopped one
    pub worker: WorkerReport,
}
