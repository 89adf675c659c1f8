//! Physical limits and pipeline parameters

/// Maximum age of a partially filled window before it is discarded (milliseconds)
pub const DEFAULT_STALENESS_THRESHOLD_MS: i64 = 30_000;

/// Maximum trusted FTM range (meters)
pub const DEFAULT_MAX_RANGE_M: f64 = 30.0;

/// Minimum anchor count for an unambiguous 3D fix
pub const MIN_ANCHORS: usize = 3;

/// Residual evaluation budget for one solve
pub const DEFAULT_MAX_EVALUATIONS: usize = 100;

/// Levenberg-Marquardt damping defaults
pub const DEFAULT_INITIAL_DAMPING: f64 = 1e-3;
pub const DEFAULT_DAMPING_FACTOR: f64 = 10.0;
pub const MIN_DAMPING: f64 = 1e-12;
pub const MAX_DAMPING: f64 = 1e12;

/// Convergence tolerances
pub const DEFAULT_STEP_TOLERANCE: f64 = 1e-10;
pub const DEFAULT_GRADIENT_TOLERANCE: f64 = 1e-12;
pub const DEFAULT_COST_TOLERANCE: f64 = 1e-15;

/// Shift applied to the centroid, along the anchor-plane normal, for coplanar layouts (meters)
pub const DEFAULT_PLANE_OFFSET_M: f64 = 0.5;

/// Number of solver failures retained for diagnostics
pub const DEFAULT_FAILURE_HISTORY: usize = 1000;
