//! State Management Integration Tests

pub mod lifecycle;
