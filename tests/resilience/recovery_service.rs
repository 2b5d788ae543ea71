use agentflow_core::resilience::{
    CircuitBreakerConfig, CircuitBreakerManager, CircuitState, DeadLetterQueue, ErrorContext,
    ErrorRecoveryService, ErrorType, RecoveryAction, RetryPolicy, Severity,
};
use agentflow_core::StepError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn service() -> ErrorRecoveryService {
    ErrorRecoveryService::new(
        RetryPolicy::default().deterministic(),
        CircuitBreakerManager::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_calls: 1,
        }),
        Arc::new(DeadLetterQueue::new(16)),
    )
}

fn context(retry_count: u32) -> ErrorContext {
    ErrorContext::for_step("fetch", "fetcher").with_retry_count(retry_count)
}

#[test]
fn test_transient_failures_retry_with_backoff() {
    let service = service();
    let record = service.record("wf-1", &StepError::transient("blip"), &context(0));
    assert_eq!(record.error_type, ErrorType::Transient);
    assert_eq!(record.severity, Severity::Low);

    let decision = service.recover(&record);
    assert_eq!(decision.action, RecoveryAction::Retry);
    assert_eq!(decision.retry_after, Some(Duration::from_secs(1)));

    let third = service.record("wf-1", &StepError::transient("blip"), &context(2));
    assert_eq!(
        service.recover(&third).retry_after,
        Some(Duration::from_secs(2))
    );
}

#[test]
fn test_exhausted_retry_budget_falls_back() {
    let service = service();
    let record = service.record("wf-1", &StepError::transient("blip"), &context(3));
    let decision = service.recover(&record);

    assert_eq!(decision.action, RecoveryAction::Fallback);
    assert_eq!(decision.metadata["reason"], json!("retry_budget_exhausted"));
    assert!(service.dead_letter_queue().is_empty());
}

#[test]
fn test_decision_table_for_non_retryable_types() {
    let service = service();

    let persistent = service.record("wf-p", &StepError::persistent("gone"), &context(0));
    assert_eq!(service.recover(&persistent).action, RecoveryAction::Escalate);

    let corrupt = service.record(
        "wf-c",
        &StepError::DataCorruption {
            message: "checksum mismatch".to_string(),
        },
        &context(0),
    );
    assert_eq!(service.recover(&corrupt).action, RecoveryAction::Rollback);

    let unknown = service.record("wf-u", &StepError::failed("produced gibberish"), &context(0));
    assert_eq!(unknown.error_type, ErrorType::Unknown);
    let decision = service.recover(&unknown);
    assert_eq!(decision.action, RecoveryAction::Fallback);
    assert_eq!(decision.metadata["reason"], json!("no_retry_strategy"));

    let parked = service.dead_letter_queue().entries_for("wf-p");
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].error_record.error_id, persistent.error_id);
    assert_eq!(service.dead_letter_queue().len(), 1);
}

#[test]
fn test_keyword_classification_feeds_the_decision() {
    let service = service();
    let record = service.record(
        "wf-n",
        &StepError::failed("connection reset by peer"),
        &context(0),
    );
    assert_eq!(record.error_type, ErrorType::Network);
    assert_eq!(service.recover(&record).action, RecoveryAction::Retry);
    assert_eq!(service.last_error_for("wf-n").unwrap().error_id, record.error_id);
}

#[test]
fn test_statistics_track_every_failure() {
    let service = service();
    for retry in 0..2 {
        let record = service.record("wf-s", &StepError::transient("blip"), &context(retry));
        service.recover(&record);
    }
    let record = service.record("wf-s", &StepError::persistent("gone"), &context(0));
    service.recover(&record);

    let stats = service.get_error_statistics();
    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.by_type[&ErrorType::Transient], 2);
    assert_eq!(stats.by_type[&ErrorType::Persistent], 1);
    assert_eq!(stats.by_severity[&Severity::High], 1);
    assert_eq!(stats.recovery_actions_taken[&RecoveryAction::Retry], 2);
    assert_eq!(stats.recovery_actions_taken[&RecoveryAction::Escalate], 1);
    assert_eq!(stats.dead_letter_queue_size, 1);
    assert_eq!(service.errors_for("wf-s").len(), 3);
}

#[tokio::test]
async fn test_protected_calls_fail_fast_once_open() {
    let service = service();

    let first: Result<(), StepError> = service
        .call_protected("smtp", || async {
            Err(StepError::Delivery {
                channel: "smtp".to_string(),
                message: "bounced".to_string(),
            })
        })
        .await;
    assert!(matches!(first, Err(StepError::Delivery { .. })));

    let second: Result<(), StepError> = service
        .call_protected("smtp", || async { Ok(()) })
        .await;
    assert_eq!(
        second,
        Err(StepError::CircuitOpen {
            dependency: "smtp".to_string()
        })
    );

    let stats = service.get_error_statistics();
    assert_eq!(stats.circuit_rejections, 1);
    assert_eq!(stats.circuit_breaker_states["smtp"], CircuitState::Open);
}
