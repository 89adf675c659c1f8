use crate::core::types::{AnchorId, MeasurementSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Failures produced while turning a measurement set into a position
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositioningError {
    #[error(
        "invalid measurement from anchor {} (index {index}): {distance_m} m is outside (0, {max_range_m}] m",
        .anchor_id.as_deref().unwrap_or("<unknown>")
    )]
    InvalidMeasurement {
        index: usize,
        anchor_id: Option<AnchorId>,
        distance_m: f64,
        max_range_m: f64,
    },

    #[error("solver did not converge within {evaluations} evaluations (cost {cost:.3e})")]
    SolverDivergence { evaluations: usize, cost: f64 },

    #[error("insufficient anchors: {available} available, {required} required")]
    InsufficientAnchors { available: usize, required: usize },

    #[error("{anchors} anchor positions but {distances} distances")]
    DimensionMismatch { anchors: usize, distances: usize },

    #[error("damped normal equations are singular")]
    SingularSystem,
}

impl PositioningError {
    /// Stable name of the failure kind, used as a statistics key
    pub fn kind(&self) -> &'static str {
        match self {
            PositioningError::InvalidMeasurement { .. } => "InvalidMeasurement",
            PositioningError::SolverDivergence { .. } => "SolverDivergence",
            PositioningError::InsufficientAnchors { .. } => "InsufficientAnchors",
            PositioningError::DimensionMismatch { .. } => "DimensionMismatch",
            PositioningError::SingularSystem => "SingularSystem",
        }
    }

    /// Attach the offending anchor id to an `InvalidMeasurement`
    pub fn with_anchor_ids(self, anchor_ids: &[AnchorId]) -> Self {
        match self {
            PositioningError::InvalidMeasurement {
                index,
                anchor_id: None,
                distance_m,
                max_range_m,
            } => PositioningError::InvalidMeasurement {
                index,
                anchor_id: anchor_ids.get(index).cloned(),
                distance_m,
                max_range_m,
            },
            other => other,
        }
    }
}

/// One failed solve, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error_id: u64,
    pub sequence: u64,
    pub error: PositioningError,
    pub anchor_ids: Vec<AnchorId>,
    pub distances: Vec<f64>,
    pub timestamp_ms: i64,
}

/// Summary of recorded failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub report_timestamp_ms: i64,
    pub total_failures: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub recent_failures: Vec<FailureRecord>,
}

#[derive(Debug, Default)]
struct ReporterState {
    history: VecDeque<FailureRecord>,
    counter: u64,
    by_kind: BTreeMap<String, u64>,
}

/// Failure sink for the solver worker.
///
/// Keeps a bounded history plus per-kind counters that survive history
/// eviction. Safe to share between the worker and readers.
#[derive(Debug)]
pub struct ErrorReporter {
    state: Mutex<ReporterState>,
    max_history_size: usize,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::with_config(crate::core::constants::DEFAULT_FAILURE_HISTORY)
    }

    pub fn with_config(max_history_size: usize) -> Self {
        Self {
            state: Mutex::new(ReporterState::default()),
            max_history_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failed solve and return its id
    pub fn report_error(&self, error: PositioningError, set: &MeasurementSet) -> u64 {
        let mut state = self.lock();
        state.counter += 1;
        let error_id = state.counter;

        *state.by_kind.entry(error.kind().to_string()).or_insert(0) += 1;

        log::warn!(
            "[failure {}] set #{} ({:?} = {:?}): {}",
            error_id,
            set.sequence,
            set.anchor_ids,
            set.distances,
            error
        );

        state.history.push_back(FailureRecord {
            error_id,
            sequence: set.sequence,
            error,
            anchor_ids: set.anchor_ids.clone(),
            distances: set.distances.clone(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        });
        while state.history.len() > self.max_history_size {
            state.history.pop_front();
        }

        error_id
    }

    /// Most recent failures, newest first
    pub fn get_recent_errors(&self, count: usize) -> Vec<FailureRecord> {
        self.lock().history.iter().rev().take(count).cloned().collect()
    }

    pub fn get_errors_by_kind(&self, kind: &str) -> Vec<FailureRecord> {
        self.lock()
            .history
            .iter()
            .filter(|r| r.error.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.lock().by_kind.get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.lock().counter
    }

    pub fn generate_error_report(&self) -> ErrorReport {
        let state = self.lock();
        ErrorReport {
            report_timestamp_ms: chrono::Utc::now().timestamp_millis(),
            total_failures: state.counter,
            failures_by_kind: state.by_kind.clone(),
            recent_failures: state.history.iter().rev().take(10).cloned().collect(),
        }
    }

    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.by_kind.clear();
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}
