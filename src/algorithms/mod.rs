//! Core positioning algorithms

pub mod geometry;
pub mod levenberg_marquardt;

pub use geometry::MirrorSide;
pub use levenberg_marquardt::{LevenbergMarquardtSolver, PositionSolver, Solution};
