//! # Circuit Breaker Configuration
//!
//! Thresholds for a single breaker plus presets for the dependency kinds the
//! orchestrator usually protects.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time since the last failure before an open circuit admits a probe
    pub recovery_timeout: Duration,

    /// Number of successful probes in half-open state to close circuit
    pub success_threshold: u32,

    /// Maximum concurrent probes admitted while half-open
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Agents doing model calls or other slow remote work
    pub fn for_agent() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }

    /// Outbound delivery (mail relays, webhooks); trips sooner, recovers slower
    pub fn for_external_delivery() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }

    /// Snapshot stores and other persistence backends
    pub fn for_persistence() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(15),
            success_threshold: 1,
            half_open_max_calls: 2,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.recovery_timeout.is_zero() {
            return Err("recovery_timeout must be greater than 0".to_string());
        }

        if self.recovery_timeout > Duration::from_secs(3600) {
            return Err("recovery_timeout should not exceed 3600 seconds".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }

        if self.success_threshold > 50 {
            return Err("success_threshold should not exceed 50".to_string());
        }

        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}
