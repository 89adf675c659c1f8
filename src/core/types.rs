//! Core data types for the positioning pipeline

use crate::algorithms::Solution;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Opaque anchor identifier (the anchor's MAC address in FTM deployments)
pub type AnchorId = String;

/// Cartesian coordinates in the room frame (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_vector3(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<Vector3<f64>> for Coordinates {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Fixed ranging reference with known coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: AnchorId,
    pub position: Coordinates,
}

impl Anchor {
    pub fn new(id: impl Into<AnchorId>, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: id.into(),
            position: Coordinates::new(x, y, z),
        }
    }
}

/// Single range reading reported by one anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub anchor_id: AnchorId,
    pub distance_m: f64,
    pub timestamp_ms: i64,
}

impl Measurement {
    pub fn new(anchor_id: impl Into<AnchorId>, distance_m: f64, timestamp_ms: i64) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            distance_m,
            timestamp_ms,
        }
    }
}

/// Immutable snapshot of a completed aggregation window.
///
/// `anchor_ids` follows the topology's canonical order and `distances` is
/// parallel to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSet {
    /// Emission order assigned by the aggregator, starting at 1
    pub sequence: u64,
    pub anchor_ids: Vec<AnchorId>,
    pub distances: Vec<f64>,
    /// Timestamp of the oldest reading in the window
    pub opened_at_ms: i64,
    /// Timestamp of the reading that completed the window
    pub completed_at_ms: i64,
}

impl MeasurementSet {
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    /// Distance reported by `anchor_id`, if it contributed to this set
    pub fn distance_for(&self, anchor_id: &str) -> Option<f64> {
        self.anchor_ids
            .iter()
            .position(|id| id == anchor_id)
            .map(|idx| self.distances[idx])
    }
}

/// Solved tag position with full provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Sequence number of the measurement set this position was solved from
    pub sequence: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Mean of |r_i| at the solution (meters); diagnostic only
    pub mean_absolute_residual: f64,
    pub anchor_ids: Vec<AnchorId>,
    pub distances: Vec<f64>,
    /// Wall-clock time of the solve (milliseconds since the Unix epoch)
    pub timestamp_ms: i64,
    /// Residual evaluations spent by the optimizer
    pub evaluations: usize,
}

impl Position {
    /// Attach provenance from `set` to a solver result
    pub fn from_solution(set: MeasurementSet, solution: &Solution, timestamp_ms: i64) -> Self {
        Self {
            sequence: set.sequence,
            x: solution.position.x,
            y: solution.position.y,
            z: solution.position.z,
            mean_absolute_residual: solution.mean_absolute_residual,
            anchor_ids: set.anchor_ids,
            distances: set.distances,
            timestamp_ms,
            evaluations: solution.evaluations,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.x, self.y, self.z)
    }

    pub fn to_vector3(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}
