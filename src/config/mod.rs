//! # Agentflow Configuration System
//!
//! Layered configuration for the orchestration core, loaded with the `config`
//! crate.
//!
//! ## Architecture
//!
//! Sources are merged in order, later ones winning:
//!
//! 1. Built-in defaults (every section is `#[serde(default)]`)
//! 2. `agentflow.toml` in the configuration directory
//! 3. `agentflow.<environment>.toml` in the same directory
//! 4. `AGENTFLOW__<SECTION>__<KEY>` environment variables
//!
//! The merged result is validated before it is handed out.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agentflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let parallelism = manager.config().orchestrator.max_parallel_agents;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::orchestration::state_manager::RetryReentryPolicy;
use crate::orchestration::types::ExecutionStrategy;
use crate::resilience::{CircuitBreakerConfig, ErrorType, RetryPolicy, RetryStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentflowConfig {
    pub orchestrator: OrchestratorConfig,
    pub state: StateConfig,
    pub recovery: RecoveryConfig,
    pub circuit_breakers: CircuitBreakerSettings,
    pub dead_letter: DeadLetterConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running steps under the parallel strategy
    pub max_parallel_agents: usize,
    pub default_strategy: ExecutionStrategy,
    /// Run the compensation hook when a step failure fails the workflow
    pub enable_rollback: bool,
    /// Used for steps that do not declare their own timeout
    pub default_step_timeout_ms: u64,
    pub local_retry_base_delay_ms: u64,
    pub local_retry_max_delay_ms: u64,
    /// Route agent calls through a per-agent circuit breaker
    pub protect_agents_with_circuit_breakers: bool,
}

impl OrchestratorConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    /// Backoff between local attempts of one step, jitter-free
    pub fn local_retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::new(
            0,
            Duration::from_millis(self.local_retry_base_delay_ms),
            Duration::from_millis(self.local_retry_max_delay_ms),
        )
        .without_jitter()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 4,
            default_strategy: ExecutionStrategy::Sequential,
            enable_rollback: true,
            default_step_timeout_ms: 300_000,
            local_retry_base_delay_ms: 100,
            local_retry_max_delay_ms: 5_000,
            protect_agents_with_circuit_breakers: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Terminal workflows older than this are removed by the retention sweep
    pub retention_hours: u64,
    pub retry_reentry_policy: RetryReentryPolicy,
}

impl StateConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            retry_reentry_policy: RetryReentryPolicy::default(),
        }
    }
}

/// One retry strategy as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// 0 disables retries for the type
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Overrides keyed by error type name (`network`, `timeout`, ...) applied
    /// on top of the built-in table
    pub retry_strategies: HashMap<String, RetryStrategyConfig>,
    /// Default jitter for strategies that do not set their own
    pub jitter: bool,
    pub error_log_capacity: usize,
    pub min_classifier_confidence: f64,
}

impl RecoveryConfig {
    /// Built-in policy with overrides applied. Unparseable type names are
    /// rejected by `validate`, so they are skipped here.
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        if !self.jitter {
            policy = policy.deterministic();
        }

        for (name, strategy) in &self.retry_strategies {
            let Ok(error_type) = name.parse::<ErrorType>() else {
                continue;
            };
            if strategy.max_attempts == 0 {
                policy.remove_strategy(error_type);
                continue;
            }
            let mut retry = RetryStrategy::new(
                strategy.max_attempts,
                Duration::from_millis(strategy.base_delay_ms),
                Duration::from_millis(strategy.max_delay_ms),
            );
            retry.jitter = strategy.jitter.unwrap_or(self.jitter);
            policy.set_strategy(error_type, retry);
        }

        policy
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retry_strategies: HashMap::new(),
            jitter: true,
            error_log_capacity: crate::resilience::recovery::DEFAULT_ERROR_LOG_CAPACITY,
            min_classifier_confidence: crate::resilience::error_classifier::DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Breaker thresholds as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl CircuitBreakerComponentConfig {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            success_threshold: self.success_threshold,
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            recovery_timeout_ms: defaults.recovery_timeout.as_millis() as u64,
            success_threshold: defaults.success_threshold,
            half_open_max_calls: defaults.half_open_max_calls,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub default: CircuitBreakerComponentConfig,
    /// Per-dependency overrides keyed by breaker name (`agent:<name>`, ...)
    pub components: HashMap<String, CircuitBreakerComponentConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub max_size: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            max_size: crate::resilience::dead_letter::DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

impl AgentflowConfig {
    /// Small, fast settings for tests: tiny delays, no jitter
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.orchestrator.default_step_timeout_ms = 5_000;
        config.orchestrator.local_retry_base_delay_ms = 1;
        config.orchestrator.local_retry_max_delay_ms = 10;
        config.recovery.jitter = false;
        config.circuit_breakers.default.recovery_timeout_ms = 100;
        config
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.orchestrator.max_parallel_agents == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.max_parallel_agents",
                "0",
                "must be greater than 0",
            ));
        }

        if self.orchestrator.default_step_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.default_step_timeout_ms",
                "0",
                "must be greater than 0",
            ));
        }

        if self.orchestrator.local_retry_base_delay_ms > self.orchestrator.local_retry_max_delay_ms
        {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.local_retry_base_delay_ms",
                self.orchestrator.local_retry_base_delay_ms.to_string(),
                "must not exceed local_retry_max_delay_ms",
            ));
        }

        for (name, strategy) in &self.recovery.retry_strategies {
            if name.parse::<ErrorType>().is_err() {
                return Err(ConfigurationError::invalid_value(
                    "recovery.retry_strategies",
                    name.clone(),
                    "not a known error type",
                ));
            }
            if strategy.max_attempts > 0 && strategy.base_delay_ms > strategy.max_delay_ms {
                return Err(ConfigurationError::invalid_value(
                    format!("recovery.retry_strategies.{name}.base_delay_ms"),
                    strategy.base_delay_ms.to_string(),
                    "must not exceed max_delay_ms",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.recovery.min_classifier_confidence) {
            return Err(ConfigurationError::invalid_value(
                "recovery.min_classifier_confidence",
                self.recovery.min_classifier_confidence.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }

        if self.recovery.error_log_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "recovery.error_log_capacity",
                "0",
                "must be greater than 0",
            ));
        }

        self.circuit_breakers
            .default
            .to_resilience_config()
            .validate()
            .map_err(|error| {
                ConfigurationError::validation_error(format!("circuit_breakers.default: {error}"))
            })?;
        for (name, component) in &self.circuit_breakers.components {
            component.to_resilience_config().validate().map_err(|error| {
                ConfigurationError::validation_error(format!(
                    "circuit_breakers.components.{name}: {error}"
                ))
            })?;
        }

        if self.dead_letter.max_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "dead_letter.max_size",
                "0",
                "must be greater than 0",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}
