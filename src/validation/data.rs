use crate::core::constants::DEFAULT_MAX_RANGE_M;
use crate::validation::error::PositioningError;

/// Range checks applied to a completed measurement set before solving
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceValidator {
    /// Largest trusted range (meters)
    pub max_range_m: f64,
}

impl Default for DistanceValidator {
    fn default() -> Self {
        Self {
            max_range_m: DEFAULT_MAX_RANGE_M,
        }
    }
}

impl DistanceValidator {
    pub fn new(max_range_m: f64) -> Self {
        Self { max_range_m }
    }

    /// `0 < d <= max_range_m`; NaN never passes
    pub fn is_valid(&self, distance_m: f64) -> bool {
        distance_m > 0.0 && distance_m <= self.max_range_m
    }

    /// Fails on the first out-of-range distance
    pub fn validate(&self, distances: &[f64]) -> Result<(), PositioningError> {
        match distances.iter().position(|&d| !self.is_valid(d)) {
            Some(index) => Err(PositioningError::InvalidMeasurement {
                index,
                anchor_id: None,
                distance_m: distances[index],
                max_range_m: self.max_range_m,
            }),
            None => Ok(()),
        }
    }
}
