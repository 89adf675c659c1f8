//! Configuration loading and validation

pub mod config;

pub use config::{default_anchors, ConfigError, SolverConfig, SystemConfig};
