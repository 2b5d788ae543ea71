//! Resilience Integration Tests

pub mod circuit_breaker;
pub mod dead_letter;
pub mod recovery_service;
