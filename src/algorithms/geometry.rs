//! Anchor geometry helpers used to seed the optimizer

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Eigenvalue ratio below which an anchor layout is treated as planar
const COPLANAR_TOLERANCE: f64 = 1e-9;

/// Which side of a planar anchor layout the tag is assumed to be on.
///
/// Three anchors (or any coplanar layout) admit two mirror-image solutions.
/// The centroid sits exactly on the mirror plane, so the start point is
/// pushed toward the expected side instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MirrorSide {
    /// Half-space whose normal points toward -z (ceiling-mounted anchors)
    #[default]
    Below,
    /// Half-space whose normal points toward +z (floor-mounted anchors)
    Above,
}

/// Arithmetic mean of the anchor positions
pub fn centroid(positions: &[Vector3<f64>]) -> Vector3<f64> {
    if positions.is_empty() {
        return Vector3::zeros();
    }
    positions.iter().fold(Vector3::zeros(), |acc, p| acc + p) / positions.len() as f64
}

/// Unit normal of the best-fit plane through the anchors, if they are coplanar
pub fn plane_normal(positions: &[Vector3<f64>]) -> Option<Vector3<f64>> {
    if positions.len() < 3 {
        return None;
    }

    let center = centroid(positions);
    let scatter = positions.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p - center;
        acc + d * d.transpose()
    });

    let eigen = scatter.symmetric_eigen();
    let (mut min_idx, mut max_idx) = (0, 0);
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
        if eigen.eigenvalues[i] > eigen.eigenvalues[max_idx] {
            max_idx = i;
        }
    }

    let largest = eigen.eigenvalues[max_idx];
    if largest <= f64::EPSILON {
        // all anchors coincide
        return None;
    }
    if eigen.eigenvalues[min_idx].abs() > COPLANAR_TOLERANCE * largest {
        return None;
    }

    let normal: Vector3<f64> = eigen.eigenvectors.column(min_idx).into_owned();
    normal.try_normalize(f64::EPSILON)
}

/// Starting point for the optimizer: the centroid, moved `plane_offset_m`
/// off the anchor plane toward `side` when the layout is planar
pub fn initial_guess(positions: &[Vector3<f64>], plane_offset_m: f64, side: MirrorSide) -> Vector3<f64> {
    let center = centroid(positions);

    match plane_normal(positions) {
        Some(normal) => {
            let oriented = match side {
                MirrorSide::Below if normal.z > 0.0 => -normal,
                MirrorSide::Above if normal.z < 0.0 => -normal,
                _ => normal,
            };
            center + oriented * plane_offset_m
        }
        None => center,
    }
}
