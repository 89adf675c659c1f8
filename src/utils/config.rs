use crate::algorithms::geometry::MirrorSide;
use crate::algorithms::LevenbergMarquardtSolver;
use crate::core::constants::*;
use crate::core::topology::AnchorTopology;
use crate::core::types::Anchor;
use crate::processing::queue::{OverflowPolicy, QueueConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration validation and loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("anchor {anchor_id} is configured more than once")]
    DuplicateAnchor { anchor_id: String },

    #[error("insufficient anchors: {available} configured, {required} required")]
    InsufficientAnchors { available: usize, required: usize },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

/// Levenberg-Marquardt tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Residual evaluation budget, including the initial evaluation
    pub max_evaluations: usize,
    /// Starting damping parameter λ
    pub initial_damping: f64,
    /// λ multiplier after a rejected step
    pub damping_increase: f64,
    /// λ divisor after an accepted step
    pub damping_decrease: f64,
    /// Relative step-size convergence threshold
    pub step_tolerance: f64,
    /// Gradient ∞-norm convergence threshold
    pub gradient_tolerance: f64,
    /// Relative cost-reduction convergence threshold
    pub cost_tolerance: f64,
    /// Distance the start point is moved off a planar anchor layout (meters)
    pub plane_offset_m: f64,
    /// Expected side of a planar anchor layout
    pub mirror_side: MirrorSide,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_evaluations: DEFAULT_MAX_EVALUATIONS,
            initial_damping: DEFAULT_INITIAL_DAMPING,
            damping_increase: DEFAULT_DAMPING_FACTOR,
            damping_decrease: DEFAULT_DAMPING_FACTOR,
            step_tolerance: DEFAULT_STEP_TOLERANCE,
            gradient_tolerance: DEFAULT_GRADIENT_TOLERANCE,
            cost_tolerance: DEFAULT_COST_TOLERANCE,
            plane_offset_m: DEFAULT_PLANE_OFFSET_M,
            mirror_side: MirrorSide::Below,
        }
    }
}

/// Startup configuration consumed by the positioning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Age at which a partially filled window is discarded (milliseconds)
    pub staleness_threshold_ms: i64,
    /// Largest accepted range (meters)
    pub max_range_m: f64,
    pub queue: QueueConfig,
    pub solver: SolverConfig,
    /// Number of solver failures kept for diagnostics
    pub failure_history: usize,
    /// Anchor layout in canonical order
    pub anchors: Vec<Anchor>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: DEFAULT_STALENESS_THRESHOLD_MS,
            max_range_m: DEFAULT_MAX_RANGE_M,
            queue: QueueConfig::default(),
            solver: SolverConfig::default(),
            failure_history: DEFAULT_FAILURE_HISTORY,
            anchors: default_anchors(),
        }
    }
}

/// The three-anchor FTM deployment
pub fn default_anchors() -> Vec<Anchor> {
    vec![
        Anchor::new("7c:df:a1:0f:af:45", -2.80, 0.00, 2.08),
        Anchor::new("7c:df:a1:0f:af:01", 0.00, 3.58, 2.04),
        Anchor::new("7c:df:a1:0e:d7:eb", 3.43, 0.00, 1.84),
    ]
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl SystemConfig {
    /// Load and validate configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            message: format!("failed to read config file '{}': {}", path_str, e),
        })?;

        let config = Self::from_json(&content).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::Serialization {
                message: format!("'{}': {}", path_str, message),
            },
            other => other,
        })?;

        log::info!(
            "Loaded configuration from {} ({} anchors)",
            path_str,
            config.anchors.len()
        );
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = serde_json::from_str(content).map_err(|e| ConfigError::Serialization {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialization {
            message: format!("failed to serialize config: {}", e),
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::Io {
            message: format!("failed to write config file '{}': {}", path_str, e),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staleness_threshold_ms <= 0 {
            return Err(invalid(
                "staleness_threshold_ms",
                self.staleness_threshold_ms,
                "staleness threshold must be positive",
            ));
        }

        if !(self.max_range_m.is_finite() && self.max_range_m > 0.0) {
            return Err(invalid("max_range_m", self.max_range_m, "maximum range must be positive and finite"));
        }

        if self.queue.capacity == Some(0) {
            return Err(invalid("queue.capacity", 0, "a bounded queue needs room for at least one set"));
        }

        let solver = &self.solver;
        if solver.max_evaluations == 0 {
            return Err(invalid("solver.max_evaluations", 0, "evaluation budget must be at least 1"));
        }
        if !(solver.initial_damping > 0.0 && solver.initial_damping.is_finite()) {
            return Err(invalid(
                "solver.initial_damping",
                solver.initial_damping,
                "damping must be positive and finite",
            ));
        }
        if !(solver.damping_increase > 1.0) {
            return Err(invalid(
                "solver.damping_increase",
                solver.damping_increase,
                "damping increase factor must be greater than 1",
            ));
        }
        if !(solver.damping_decrease > 1.0) {
            return Err(invalid(
                "solver.damping_decrease",
                solver.damping_decrease,
                "damping decrease factor must be greater than 1",
            ));
        }
        for (name, value) in [
            ("solver.step_tolerance", solver.step_tolerance),
            ("solver.gradient_tolerance", solver.gradient_tolerance),
            ("solver.cost_tolerance", solver.cost_tolerance),
            ("solver.plane_offset_m", solver.plane_offset_m),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(invalid(name, value, "must be non-negative and finite"));
            }
        }

        // topology construction checks count, uniqueness and finiteness
        AnchorTopology::new(self.anchors.clone()).map(|_| ())
    }

    pub fn topology(&self) -> Result<AnchorTopology, ConfigError> {
        AnchorTopology::new(self.anchors.clone())
    }

    pub fn build_solver(&self) -> LevenbergMarquardtSolver {
        LevenbergMarquardtSolver::new(self.solver.clone(), self.max_range_m)
    }

    pub fn with_anchors(mut self, anchors: Vec<Anchor>) -> Self {
        self.anchors = anchors;
        self
    }

    pub fn with_bounded_queue(mut self, capacity: usize, overflow: OverflowPolicy) -> Self {
        self.queue = QueueConfig {
            capacity: Some(capacity),
            overflow,
        };
        self
    }
}
