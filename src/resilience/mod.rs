//! # Resilience Module
//!
//! Failure handling for the orchestrator: circuit breakers per dependency,
//! error classification, retry backoff, the dead-letter queue and the
//! recovery service composing them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agentflow_core::error::StepError;
//! use agentflow_core::resilience::{ErrorContext, ErrorRecoveryService, RecoveryAction};
//!
//! let service = ErrorRecoveryService::default();
//! let record = service.record(
//!     "wf-1",
//!     &StepError::transient("upstream hiccup"),
//!     &ErrorContext::for_step("draft", "writer"),
//! );
//! let decision = service.recover(&record);
//! assert_eq!(decision.action, RecoveryAction::Retry);
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod dead_letter;
pub mod error_classifier;
pub mod manager;
pub mod metrics;
pub mod recovery;
pub mod retry;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use error_classifier::{ClassifierChain, ErrorClassification, ErrorClassifier};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use recovery::{ErrorRecoveryService, ErrorStatistics};
pub use retry::{RetryPolicy, RetryStrategy};
pub use types::{
    ErrorContext, ErrorRecord, ErrorType, RecoveryAction, RecoveryDecision, Severity,
};
