//! # Retry Policy
//!
//! Per-[`ErrorType`] retry strategies and the exponential backoff schedule.
//!
//! The delay for escalation-level retry `n` (1-based) is
//! `base_delay * 2^(n-1)`, capped at `max_delay`. With jitter enabled the
//! result is scaled by a random factor in `[0.5, 1.5)` and re-capped.

use crate::resilience::ErrorType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// Escalation-level retries allowed before falling through to the other
    /// recovery actions
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryStrategy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Deterministic part of the schedule; `retry_count` 0 is treated as 1
    pub fn base_delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.max(1) - 1;
        // 2^31 * any non-zero base already exceeds every sane max_delay
        let multiplier = 2u32.saturating_pow(exponent.min(31));
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff to wait before retry number `retry_count`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let delay = self.base_delay_for(retry_count);
        if self.jitter {
            apply_jitter(delay).min(self.max_delay)
        } else {
            delay
        }
    }
}

/// Scale by a random factor in `[0.5, 1.5)`
pub fn apply_jitter(delay: Duration) -> Duration {
    delay.mul_f64(0.5 + fastrand::f64())
}

/// Retry strategies by error type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    strategies: HashMap<ErrorType, RetryStrategy>,
}

impl RetryPolicy {
    /// No retries for any type
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn with_strategy(mut self, error_type: ErrorType, strategy: RetryStrategy) -> Self {
        self.strategies.insert(error_type, strategy);
        self
    }

    pub fn set_strategy(&mut self, error_type: ErrorType, strategy: RetryStrategy) {
        self.strategies.insert(error_type, strategy);
    }

    pub fn remove_strategy(&mut self, error_type: ErrorType) -> Option<RetryStrategy> {
        self.strategies.remove(&error_type)
    }

    pub fn strategy_for(&self, error_type: ErrorType) -> Option<&RetryStrategy> {
        self.strategies.get(&error_type)
    }

    /// `Some(delay)` while `retry_count` is under the type's budget
    pub fn next_delay(&self, error_type: ErrorType, retry_count: u32) -> Option<Duration> {
        let strategy = self.strategy_for(error_type)?;
        (retry_count < strategy.max_attempts).then(|| strategy.delay_for(retry_count))
    }

    /// Same policy with jitter switched off everywhere; handy for tests and
    /// reproducible runs
    pub fn deterministic(mut self) -> Self {
        for strategy in self.strategies.values_mut() {
            strategy.jitter = false;
        }
        self
    }
}

impl Default for RetryPolicy {
    /// Transient-looking failures retry; everything else goes straight to the
    /// decision table
    fn default() -> Self {
        let secs = Duration::from_secs;
        Self::empty()
            .with_strategy(ErrorType::Transient, RetryStrategy::new(3, secs(1), secs(30)))
            .with_strategy(ErrorType::Network, RetryStrategy::new(3, secs(2), secs(60)))
            .with_strategy(ErrorType::Timeout, RetryStrategy::new(2, secs(5), secs(60)))
            .with_strategy(
                ErrorType::ResourceExhaustion,
                RetryStrategy::new(2, secs(10), secs(120)),
            )
            .with_strategy(ErrorType::AgentFailure, RetryStrategy::new(2, secs(1), secs(15)))
            .with_strategy(
                ErrorType::ExternalDeliveryError,
                RetryStrategy::new(3, secs(5), secs(300)),
            )
            .with_strategy(
                ErrorType::PersistenceError,
                RetryStrategy::new(2, secs(1), secs(10)),
            )
    }
}
