//! # Error Recovery Service
//!
//! The single place where an arbitrary step failure becomes a bounded,
//! observable, policy-driven action.
//!
//! ## Overview
//!
//! - [`ErrorRecoveryService::classify`] runs the classifier chain.
//! - [`ErrorRecoveryService::record`] classifies, appends the result to a
//!   bounded error log and bumps the per-type counters.
//! - [`ErrorRecoveryService::recover`] turns a record into a
//!   [`RecoveryDecision`]:
//!
//! ```text
//! retry strategy for type and retry_count < max_attempts  => Retry (backoff)
//! Persistent | Configuration | Authentication             => Escalate (dead letter)
//! DataCorruption                                          => Rollback
//! anything else                                           => Fallback
//! ```
//!
//! The service also owns the per-dependency circuit breakers and offers
//! [`ErrorRecoveryService::call_protected`] so callers never talk to a breaker
//! directly.

use crate::config::AgentflowConfig;
use crate::error::StepError;
use crate::events::{EventPublisher, WorkflowEvent};
use crate::logging::{log_error, log_recovery_decision};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerManager, CircuitState, ClassifierChain, DeadLetterQueue,
    ErrorContext, ErrorRecord, ErrorType, RecoveryAction, RecoveryDecision, RetryPolicy, Severity,
    SystemCircuitBreakerMetrics,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 10_000;

/// Aggregate view returned by `get_error_statistics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub by_type: BTreeMap<ErrorType, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
    pub recovery_actions_taken: BTreeMap<RecoveryAction, u64>,
    pub dead_letter_queue_size: usize,
    pub circuit_breaker_states: BTreeMap<String, CircuitState>,
    /// Calls refused by an open breaker through `call_protected`
    pub circuit_rejections: u64,
}

#[derive(Debug, Default)]
struct ErrorLog {
    records: VecDeque<ErrorRecord>,
    total_errors: u64,
    by_type: BTreeMap<ErrorType, u64>,
    by_severity: BTreeMap<Severity, u64>,
    actions: BTreeMap<RecoveryAction, u64>,
}

#[derive(Debug)]
pub struct ErrorRecoveryService {
    classifier: ClassifierChain,
    retry_policy: RetryPolicy,
    circuit_breakers: CircuitBreakerManager,
    dead_letter_queue: Arc<DeadLetterQueue>,
    events: Option<EventPublisher>,
    log: Mutex<ErrorLog>,
    error_log_capacity: usize,
    circuit_rejections: AtomicU64,
}

impl ErrorRecoveryService {
    pub fn new(
        retry_policy: RetryPolicy,
        circuit_breakers: CircuitBreakerManager,
        dead_letter_queue: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            classifier: ClassifierChain::standard(),
            retry_policy,
            circuit_breakers,
            dead_letter_queue,
            events: None,
            log: Mutex::new(ErrorLog::default()),
            error_log_capacity: DEFAULT_ERROR_LOG_CAPACITY,
            circuit_rejections: AtomicU64::new(0),
        }
    }

    /// Build every component from loaded configuration
    pub fn from_config(config: &AgentflowConfig) -> Self {
        let breaker_defaults = config.circuit_breakers.default.to_resilience_config();
        let component_configs = config
            .circuit_breakers
            .components
            .iter()
            .map(|(name, component)| (name.clone(), component.to_resilience_config()))
            .collect();

        Self::new(
            config.recovery.retry_policy(),
            CircuitBreakerManager::with_component_configs(breaker_defaults, component_configs),
            Arc::new(DeadLetterQueue::new(config.dead_letter.max_size)),
        )
        .with_classifier(ClassifierChain::standard_with_confidence(
            config.recovery.min_classifier_confidence,
        ))
        .with_error_log_capacity(config.recovery.error_log_capacity)
    }

    pub fn with_classifier(mut self, classifier: ClassifierChain) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_event_publisher(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_error_log_capacity(mut self, capacity: usize) -> Self {
        self.error_log_capacity = capacity.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn dead_letter_queue(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letter_queue
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        &self.circuit_breakers
    }

    /// Breaker for a dependency, created on first use
    pub fn circuit_breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.circuit_breakers.get_circuit_breaker(dependency)
    }

    pub fn classify(&self, error: &StepError, context: &ErrorContext) -> (ErrorType, Severity) {
        let classification = self.classifier.classify(error, context);
        debug!(
            error_kind = error.kind(),
            error_type = %classification.error_type,
            severity = %classification.severity,
            classifier = %classification.classifier,
            confidence = classification.confidence,
            "Classified step failure"
        );
        (classification.error_type, classification.severity)
    }

    /// Classify and log a failure. Never swallows: every call produces a
    /// record and moves the counters.
    pub fn record(
        &self,
        workflow_id: &str,
        error: &StepError,
        context: &ErrorContext,
    ) -> ErrorRecord {
        let (error_type, severity) = self.classify(error, context);

        let mut record = ErrorRecord::new(workflow_id, error_type, severity, error.to_string())
            .with_retry_count(context.retry_count);
        record.step_id = context.step_id.clone();
        record.agent_name = context.agent_name.clone();
        record.phase = context.phase.clone();
        record.context = context.metadata.clone();
        record
            .context
            .insert("error_kind".to_string(), json!(error.kind()));
        if let Ok(detail) = serde_json::to_value(error) {
            record.context.insert("error".to_string(), detail);
        }

        {
            let mut log = self.log.lock();
            log.total_errors += 1;
            *log.by_type.entry(error_type).or_insert(0) += 1;
            *log.by_severity.entry(severity).or_insert(0) += 1;
            if log.records.len() >= self.error_log_capacity {
                log.records.pop_front();
            }
            log.records.push_back(record.clone());
        }

        log_error(
            "error_recovery",
            context.phase.as_deref().unwrap_or("step_execution"),
            &record.message,
            Some(&format!(
                "workflow_id={} error_id={} error_type={} severity={}",
                workflow_id, record.error_id, error_type, severity
            )),
        );

        self.publish(WorkflowEvent::ErrorRecorded {
            record: record.clone(),
        });

        record
    }

    /// Decide what to do with a recorded failure. An Escalate decision parks
    /// the record in the dead-letter queue before returning.
    pub fn recover(&self, record: &ErrorRecord) -> RecoveryDecision {
        let decision = if let Some(delay) = self
            .retry_policy
            .next_delay(record.error_type, record.retry_count)
        {
            RecoveryDecision::retry_after(delay)
                .with_metadata("reason", json!("retry_strategy"))
                .with_metadata("attempt", json!(record.retry_count + 1))
        } else if record.error_type.requires_escalation() {
            RecoveryDecision::new(RecoveryAction::Escalate)
                .with_metadata("reason", json!("unrecoverable_error_type"))
        } else if record.error_type == ErrorType::DataCorruption {
            RecoveryDecision::new(RecoveryAction::Rollback)
                .with_metadata("reason", json!("data_corruption"))
        } else {
            let reason = if self.retry_policy.strategy_for(record.error_type).is_some() {
                "retry_budget_exhausted"
            } else {
                "no_retry_strategy"
            };
            RecoveryDecision::new(RecoveryAction::Fallback).with_metadata("reason", json!(reason))
        };
        let decision = decision
            .with_metadata("error_type", json!(record.error_type))
            .with_metadata("retry_count", json!(record.retry_count));

        *self.log.lock().actions.entry(decision.action).or_insert(0) += 1;

        log_recovery_decision(
            &record.workflow_id,
            &record.error_id,
            record.error_type.as_str(),
            &decision.action.to_string(),
            decision.retry_after.map(|delay| delay.as_millis() as u64),
        );

        self.publish(WorkflowEvent::RecoveryDecided {
            error_id: record.error_id.clone(),
            workflow_id: record.workflow_id.clone(),
            decision: decision.clone(),
        });

        if decision.action == RecoveryAction::Escalate {
            self.dead_letter_queue
                .add(record.workflow_id.clone(), record.clone());
            self.publish(WorkflowEvent::DeadLettered {
                workflow_id: record.workflow_id.clone(),
                error_id: record.error_id.clone(),
            });
        }

        decision
    }

    /// Run `operation` behind the dependency's breaker. An open breaker
    /// surfaces as [`StepError::CircuitOpen`] without running the operation.
    pub async fn call_protected<F, Fut, T>(
        &self,
        dependency: &str,
        operation: F,
    ) -> Result<T, StepError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let breaker = self.circuit_breaker(dependency);
        match breaker.call(operation).await {
            Ok(value) => Ok(value),
            Err(crate::resilience::CircuitBreakerError::OperationFailed(error)) => Err(error),
            Err(crate::resilience::CircuitBreakerError::CircuitOpen { component }) => {
                self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
                Err(StepError::CircuitOpen {
                    dependency: component,
                })
            }
        }
    }

    /// Logged errors for one workflow, oldest first
    pub fn errors_for(&self, workflow_id: &str) -> Vec<ErrorRecord> {
        self.log
            .lock()
            .records
            .iter()
            .filter(|record| record.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub fn last_error_for(&self, workflow_id: &str) -> Option<ErrorRecord> {
        self.log
            .lock()
            .records
            .iter()
            .rev()
            .find(|record| record.workflow_id == workflow_id)
            .cloned()
    }

    pub fn circuit_breaker_metrics(&self) -> SystemCircuitBreakerMetrics {
        self.circuit_breakers.get_system_metrics()
    }

    pub fn get_error_statistics(&self) -> ErrorStatistics {
        let circuit_breaker_states = self
            .circuit_breakers
            .get_system_metrics()
            .circuit_breakers
            .into_iter()
            .map(|(name, metrics)| (name, metrics.current_state))
            .collect();

        let log = self.log.lock();
        ErrorStatistics {
            total_errors: log.total_errors,
            by_type: log.by_type.clone(),
            by_severity: log.by_severity.clone(),
            recovery_actions_taken: log.actions.clone(),
            dead_letter_queue_size: self.dead_letter_queue.len(),
            circuit_breaker_states,
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl Default for ErrorRecoveryService {
    fn default() -> Self {
        Self::new(
            RetryPolicy::default(),
            CircuitBreakerManager::default(),
            Arc::new(DeadLetterQueue::default()),
        )
    }
}
