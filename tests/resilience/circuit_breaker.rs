use agentflow_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager, CircuitState,
};
use std::time::Duration;

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        recovery_timeout: Duration::from_secs(1),
        success_threshold: 2,
        half_open_max_calls: 2,
    }
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
    breaker.call(|| async { Err::<(), _>("boom") }).await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<u32, CircuitBreakerError<&'static str>> {
    breaker.call(|| async { Ok::<_, &'static str>(7) }).await
}

#[tokio::test(start_paused = true)]
async fn test_full_breaker_cycle() {
    let breaker = CircuitBreaker::new("smtp", config());

    for _ in 0..3 {
        assert!(matches!(
            fail(&breaker).await,
            Err(CircuitBreakerError::OperationFailed("boom"))
        ));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = succeed(&breaker).await;
    assert!(rejected.unwrap_err().is_circuit_open());
    assert_eq!(breaker.metrics().rejected_calls, 1);

    tokio::time::advance(Duration::from_millis(1_001)).await;

    assert_eq!(succeed(&breaker).await.unwrap(), 7);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(succeed(&breaker).await.unwrap(), 7);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let breaker = CircuitBreaker::new("db", config());
    for _ in 0..3 {
        let _ = fail(&breaker).await;
    }
    tokio::time::advance(Duration::from_secs(2)).await;

    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let breaker = CircuitBreaker::new("api", config());
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    succeed(&breaker).await.unwrap();
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_manager_shares_breakers_per_component() {
    let manager = CircuitBreakerManager::new(config());
    let first = manager.get_circuit_breaker("agent:writer");
    let second = manager.get_circuit_breaker("agent:writer");

    for _ in 0..3 {
        let _ = fail(&first).await;
    }
    assert_eq!(second.state(), CircuitState::Open);

    let system = manager.get_system_metrics();
    assert_eq!(system.unhealthy_circuits(), vec!["agent:writer"]);
    assert_eq!(system.total_failures(), 3);

    manager.force_close_all();
    assert_eq!(first.state(), CircuitState::Closed);
}
