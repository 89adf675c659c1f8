//! Core types, anchor topology and constants for the positioning pipeline

pub mod constants;
pub mod topology;
pub mod types;

pub use constants::*;
pub use topology::AnchorTopology;
pub use types::*;
