//! # Circuit Breaker Implementation
//!
//! Per-dependency fail-fast gate. Three states: Closed (normal operation),
//! Open (calls rejected without running) and HalfOpen (a bounded number of
//! probes test whether the dependency recovered).
//!
//! State lives behind a short `parking_lot` mutex that is never held across an
//! await, so a slow protected call does not block other callers' admission
//! checks.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - limited calls allowed to test dependency health
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Consecutive failures while closed
    failure_count: u32,
    /// Consecutive successful probes while half-open
    success_count: u32,
    half_open_in_flight: u32,
    last_failure_time: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    metrics: CircuitBreakerMetrics,
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            half_open_max_calls = config.half_open_max_calls,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                last_failure_time: None,
                last_failure_at: None,
                metrics: CircuitBreakerMetrics::new(),
            }),
        }
    }

    /// Current state, without side effects.
    ///
    /// An Open breaker whose recovery timeout has elapsed still reports Open
    /// until the next call admits a probe.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admitted_in = self.try_acquire().ok_or_else(|| CircuitBreakerError::CircuitOpen {
            component: self.name.clone(),
        })?;

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(admitted_in, duration),
            Err(_) => self.record_failure(admitted_in, duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Admission check. Returns the state the call was admitted in, or `None`
    /// when rejected.
    fn try_acquire(&self) -> Option<CircuitState> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure_time
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);
            if recovered {
                self.transition_to_half_open(&mut inner);
            } else {
                inner.metrics.rejected_calls += 1;
                debug!(component = %self.name, "Circuit open, rejecting call");
                return None;
            }
        }

        match inner.state {
            CircuitState::Closed => Some(CircuitState::Closed),
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Some(CircuitState::HalfOpen)
                } else {
                    inner.metrics.rejected_calls += 1;
                    debug!(component = %self.name, "Half-open probe limit reached, rejecting call");
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    /// Record a successful operation
    fn record_success(&self, admitted_in: CircuitState, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;

        if admitted_in == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🟢 Operation succeeded"
        );

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    fn record_failure(&self, admitted_in: CircuitState, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;
        inner.last_failure_time = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        if admitted_in == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🔴 Operation failed"
        );

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state immediately opens circuit
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.metrics.state_transitions += 1;

        info!(
            component = %self.name,
            total_calls = inner.metrics.total_calls,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        if inner.last_failure_time.is_none() {
            inner.last_failure_time = Some(Instant::now());
        }
        inner.metrics.state_transitions += 1;

        error!(
            component = %self.name,
            consecutive_failures = inner.failure_count,
            failure_threshold = self.config.failure_threshold,
            recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::HalfOpen;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.metrics.state_transitions += 1;

        info!(
            component = %self.name,
            success_threshold = self.config.success_threshold,
            "🟡 Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        self.transition_to_open(&mut inner);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();

        snapshot.current_state = inner.state;
        snapshot.consecutive_failures = inner.failure_count;
        snapshot.half_open_successes = inner.success_count;
        snapshot.last_failure_at = inner.last_failure_at;

        if snapshot.total_calls > 0 {
            snapshot.failure_rate = snapshot.failure_count as f64 / snapshot.total_calls as f64;
            snapshot.success_rate = snapshot.success_count as f64 / snapshot.total_calls as f64;
            snapshot.average_duration =
                average_duration(snapshot.total_duration, snapshot.total_calls);
        }

        snapshot
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        let metrics = self.metrics();
        if metrics.current_state != CircuitState::Closed {
            return false;
        }
        if metrics.total_calls < 10 {
            // Too few calls to determine health
            return true;
        }
        metrics.failure_rate < 0.1
    }
}

/// Mean call time. Division happens in nanoseconds so any call count works.
fn average_duration(total: Duration, calls: u64) -> Duration {
    if calls == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(calls);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
