//! Orchestration Integration Tests

pub mod control;
pub mod recovery_paths;
pub mod strategies;
