use crate::algorithms::geometry::initial_guess;
use crate::core::constants::{MAX_DAMPING, MIN_ANCHORS, MIN_DAMPING};
use crate::utils::config::SolverConfig;
use crate::validation::data::DistanceValidator;
use crate::validation::error::PositioningError;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

/// Result of a converged solve
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub position: Vector3<f64>,
    /// Mean of |r_i| at `position` (meters)
    pub mean_absolute_residual: f64,
    /// Final residuals `||p - a_i|| - d_i`, parallel to the input anchors
    pub residuals: Vec<f64>,
    /// Residual evaluations spent, including the initial one
    pub evaluations: usize,
    /// Accepted steps
    pub iterations: usize,
}

/// Range-only position estimator.
///
/// The solver worker only depends on this trait, so alternative estimators
/// (or instrumented ones in tests) can be swapped in.
pub trait PositionSolver: Send + Sync {
    fn solve(&self, anchors: &[Vector3<f64>], distances: &[f64]) -> Result<Solution, PositioningError>;
}

/// Damped Gauss-Newton multilateration
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSolver {
    pub config: SolverConfig,
    validator: DistanceValidator,
}

impl Default for LevenbergMarquardtSolver {
    fn default() -> Self {
        Self {
            config: SolverConfig::default(),
            validator: DistanceValidator::default(),
        }
    }
}

impl LevenbergMarquardtSolver {
    pub fn new(config: SolverConfig, max_range_m: f64) -> Self {
        Self {
            config,
            validator: DistanceValidator::new(max_range_m),
        }
    }

    pub fn max_range_m(&self) -> f64 {
        self.validator.max_range_m
    }

    /// Residuals `||p - a_i|| - d_i`
    fn compute_residuals(
        &self,
        anchors: &[Vector3<f64>],
        distances: &[f64],
        estimate: &Vector3<f64>,
    ) -> DVector<f64> {
        DVector::from_iterator(
            anchors.len(),
            anchors
                .iter()
                .zip(distances)
                .map(|(anchor, d)| (estimate - anchor).norm() - d),
        )
    }

    /// Rows are unit vectors from each anchor toward the estimate
    fn compute_jacobian(&self, anchors: &[Vector3<f64>], estimate: &Vector3<f64>) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(anchors.len(), 3);

        for (i, anchor) in anchors.iter().enumerate() {
            let diff = estimate - anchor;
            let range = diff.norm();
            // left as zero when the estimate sits on the anchor
            if range > 1e-12 {
                let unit = diff / range;
                jacobian[(i, 0)] = unit.x;
                jacobian[(i, 1)] = unit.y;
                jacobian[(i, 2)] = unit.z;
            }
        }

        jacobian
    }

    fn check_inputs(&self, anchors: &[Vector3<f64>], distances: &[f64]) -> Result<(), PositioningError> {
        if anchors.len() != distances.len() {
            return Err(PositioningError::DimensionMismatch {
                anchors: anchors.len(),
                distances: distances.len(),
            });
        }
        if anchors.len() < MIN_ANCHORS {
            return Err(PositioningError::InsufficientAnchors {
                available: anchors.len(),
                required: MIN_ANCHORS,
            });
        }
        self.validator.validate(distances)
    }

    fn finish(
        &self,
        position: Vector3<f64>,
        residuals: &DVector<f64>,
        evaluations: usize,
        iterations: usize,
    ) -> Solution {
        let mean_absolute_residual = residuals.iter().map(|r| r.abs()).sum::<f64>() / residuals.len() as f64;

        log::debug!(
            "LM converged at ({:.4}, {:.4}, {:.4}) after {} evaluations / {} steps, mean |r| = {:.2e}",
            position.x,
            position.y,
            position.z,
            evaluations,
            iterations,
            mean_absolute_residual
        );

        Solution {
            position,
            mean_absolute_residual,
            residuals: residuals.iter().copied().collect(),
            evaluations,
            iterations,
        }
    }
}

impl PositionSolver for LevenbergMarquardtSolver {
    fn solve(&self, anchors: &[Vector3<f64>], distances: &[f64]) -> Result<Solution, PositioningError> {
        self.check_inputs(anchors, distances)?;

        let cfg = &self.config;
        let mut estimate = initial_guess(anchors, cfg.plane_offset_m, cfg.mirror_side);
        let mut residuals = self.compute_residuals(anchors, distances, &estimate);
        let mut cost = residuals.dot(&residuals);
        let mut evaluations = 1;
        let mut iterations = 0;
        let mut lambda = cfg.initial_damping;

        loop {
            let jacobian = self.compute_jacobian(anchors, &estimate);
            let jt_j = Matrix3::from_fn(|i, j| jacobian.column(i).dot(&jacobian.column(j)));
            let gradient = Vector3::from_fn(|i, _| jacobian.column(i).dot(&residuals));

            if gradient.amax() <= cfg.gradient_tolerance {
                return Ok(self.finish(estimate, &residuals, evaluations, iterations));
            }

            // retry with growing damping until the cost drops
            loop {
                let damped = jt_j + Matrix3::identity() * lambda;
                let step = damped
                    .cholesky()
                    .ok_or(PositioningError::SingularSystem)?
                    .solve(&(-gradient));

                // a step costs no evaluation
                if step.norm() <= cfg.step_tolerance * (estimate.norm() + cfg.step_tolerance) {
                    return Ok(self.finish(estimate, &residuals, evaluations, iterations));
                }

                if evaluations >= cfg.max_evaluations {
                    return Err(PositioningError::SolverDivergence { evaluations, cost });
                }

                let candidate = estimate + step;
                let candidate_residuals = self.compute_residuals(anchors, distances, &candidate);
                let candidate_cost = candidate_residuals.dot(&candidate_residuals);
                evaluations += 1;

                if candidate_cost < cost {
                    let reduction = cost - candidate_cost;
                    let previous_cost = cost;

                    estimate = candidate;
                    residuals = candidate_residuals;
                    cost = candidate_cost;
                    iterations += 1;
                    lambda = (lambda / cfg.damping_decrease).max(MIN_DAMPING);

                    if reduction <= cfg.cost_tolerance * previous_cost {
                        return Ok(self.finish(estimate, &residuals, evaluations, iterations));
                    }
                    break;
                }

                lambda = (lambda * cfg.damping_increase).min(MAX_DAMPING);
            }
        }
    }
}
