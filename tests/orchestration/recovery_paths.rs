use crate::common::{input, orchestrator, orchestrator_with, ScriptedAgent, SlowAgent};
use agentflow_core::config::AgentflowConfig;
use agentflow_core::orchestration::{InMemoryAgentRegistry, WorkflowDefinition, WorkflowStep};
use agentflow_core::resilience::{CircuitState, ErrorType, RecoveryAction};
use agentflow_core::{StepError, WorkflowStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_fallback_agent_takes_over_unrecognised_failure() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let primary = ScriptedAgent::failing(StepError::failed("produced gibberish"));
    let backup = ScriptedAgent::succeeding(json!({ "source": "backup" }));
    registry.register("primary", primary.clone());
    registry.register("backup", backup.clone());

    let orchestrator = orchestrator(registry);
    let definition = WorkflowDefinition::new("fallback")
        .with_step(WorkflowStep::new("answer", "primary").with_fallback_agent("backup"));

    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert!(result.is_success(), "unexpected result: {result:?}");
    assert_eq!(result.step_result("answer"), Some(&json!({ "source": "backup" })));
    assert_eq!(primary.calls(), 1);
    assert_eq!(backup.calls(), 1);

    let stats = orchestrator.get_error_statistics();
    assert_eq!(stats.by_type.get(&ErrorType::Unknown), Some(&1));
    assert_eq!(
        stats.recovery_actions_taken.get(&RecoveryAction::Fallback),
        Some(&1)
    );
}

#[tokio::test]
async fn test_fallback_without_alternative_fails_workflow() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register(
        "primary",
        ScriptedAgent::failing(StepError::failed("produced gibberish")),
    );

    let orchestrator = orchestrator(registry);
    let definition = WorkflowDefinition::new("no-fallback")
        .with_workflow_id("wf-no-fallback")
        .with_step(WorkflowStep::new("answer", "primary"));

    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let failure = result.error().unwrap();
    assert_eq!(failure.recovery_action, RecoveryAction::Fallback);
    assert_eq!(
        orchestrator.get_status("wf-no-fallback").unwrap().status(),
        WorkflowStatus::Failed
    );
    assert!(orchestrator.recovery_service().dead_letter_queue().is_empty());
}

#[tokio::test]
async fn test_data_corruption_rolls_back_with_metadata() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("extract", ScriptedAgent::succeeding(json!({ "rows": 10 })));
    registry.register("transform", ScriptedAgent::succeeding(json!({ "rows": 10 })));
    registry.register(
        "load",
        ScriptedAgent::failing(StepError::DataCorruption {
            message: "checksum mismatch".to_string(),
        }),
    );

    let orchestrator = orchestrator(registry);
    let definition = WorkflowDefinition::new("etl")
        .with_workflow_id("wf-etl")
        .with_step(WorkflowStep::new("extract", "extract"))
        .with_step(WorkflowStep::new("transform", "transform").depends_on("extract"))
        .with_step(WorkflowStep::new("load", "load").depends_on("transform"));

    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let failure = result.error().unwrap();
    assert_eq!(failure.error_type, ErrorType::DataCorruption);
    assert_eq!(failure.recovery_action, RecoveryAction::Rollback);

    let state = orchestrator.get_status("wf-etl").unwrap();
    assert_eq!(state.status(), WorkflowStatus::Failed);
    let rollback = &state.error_data()["rollback"];
    assert_eq!(rollback["failed_step"], json!("load"));
    assert_eq!(rollback["completed_steps"], json!(["extract", "transform"]));
    assert_eq!(rollback["recovery_action"], json!("rollback"));

    let last = state.state_history().last().unwrap();
    assert_eq!(last.to_state(), WorkflowStatus::Failed);
    assert_eq!(last.metadata()["error_id"], json!(failure.error_id));
}

#[tokio::test]
async fn test_rollback_disabled_skips_compensation() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register(
        "load",
        ScriptedAgent::failing(StepError::DataCorruption {
            message: "checksum mismatch".to_string(),
        }),
    );

    let mut config = AgentflowConfig::for_testing();
    config.orchestrator.enable_rollback = false;
    let orchestrator = orchestrator_with(registry, config);
    let definition = WorkflowDefinition::new("etl")
        .with_workflow_id("wf-etl-no-rollback")
        .with_step(WorkflowStep::new("load", "load"));

    orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let state = orchestrator.get_status("wf-etl-no-rollback").unwrap();
    assert!(state.error_data().get("rollback").is_none());
    assert!(state.error_data().get("failure").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_then_fail() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let slow = SlowAgent::new(Duration::from_secs(60));
    registry.register("slow", slow.clone());

    let orchestrator = orchestrator(registry);
    let definition = WorkflowDefinition::new("timeout").with_step(
        WorkflowStep::new("wait", "slow").with_timeout(Duration::from_millis(50)),
    );

    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let failure = result.error().unwrap();
    assert_eq!(failure.error_type, ErrorType::Timeout);
    // one attempt plus the two retries the timeout strategy allows
    assert_eq!(slow.calls(), 3);
    assert_eq!(
        orchestrator.get_error_statistics().by_type.get(&ErrorType::Timeout),
        Some(&3)
    );
}

#[tokio::test]
async fn test_unregistered_agent_escalates() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let orchestrator = orchestrator(registry);
    let definition = WorkflowDefinition::new("missing")
        .with_workflow_id("wf-missing")
        .with_step(WorkflowStep::new("a", "nobody"));

    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let failure = result.error().unwrap();
    assert_eq!(failure.error_type, ErrorType::Configuration);
    assert_eq!(failure.recovery_action, RecoveryAction::Escalate);
    assert!(failure.message.contains("nobody"));
    assert_eq!(
        orchestrator
            .recovery_service()
            .dead_letter_queue()
            .entries_for("wf-missing")
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_agent_calls() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let flaky = ScriptedAgent::failing(StepError::Network {
        message: "connection reset".to_string(),
    });
    registry.register("remote", flaky.clone());

    let mut config = AgentflowConfig::for_testing();
    config.circuit_breakers.default.failure_threshold = 2;
    config.circuit_breakers.default.recovery_timeout_ms = 600_000;
    let orchestrator = orchestrator_with(registry, config);

    let definition = WorkflowDefinition::new("remote")
        .with_step(WorkflowStep::new("fetch", "remote"));

    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    // Rejected retries still report the agent's own network error
    let failure = result.error().unwrap();
    assert_eq!(failure.error_type, ErrorType::Network);
    assert_eq!(failure.recovery_action, RecoveryAction::Fallback);
    assert_eq!(flaky.calls(), 2);

    let stats = orchestrator.get_error_statistics();
    assert_eq!(stats.circuit_rejections, 2);
    assert_eq!(
        stats.circuit_breaker_states.get("agent:remote"),
        Some(&CircuitState::Open)
    );
    assert_eq!(stats.by_type.get(&ErrorType::Network), Some(&4));
    assert_eq!(stats.by_type.get(&ErrorType::ResourceExhaustion), None);
}

#[tokio::test(start_paused = true)]
async fn test_step_that_never_reaches_its_agent_reports_open_circuit() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let remote = ScriptedAgent::succeeding(json!("unreachable"));
    registry.register("remote", remote.clone());

    let mut config = AgentflowConfig::for_testing();
    config.circuit_breakers.default.recovery_timeout_ms = 600_000;
    let orchestrator = orchestrator_with(registry, config);
    orchestrator
        .recovery_service()
        .circuit_breaker("agent:remote")
        .force_open();

    let definition = WorkflowDefinition::new("remote")
        .with_workflow_id("wf-rejected")
        .with_step(WorkflowStep::new("fetch", "remote"));

    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let failure = result.error().unwrap();
    assert_eq!(failure.error_type, ErrorType::ResourceExhaustion);
    assert_eq!(remote.calls(), 0);

    let record = orchestrator
        .recovery_service()
        .last_error_for("wf-rejected")
        .unwrap();
    assert_eq!(
        record.context.get("circuit_rejected"),
        Some(&json!("agent:remote"))
    );
    assert_eq!(orchestrator.get_error_statistics().circuit_rejections, 3);
}

#[tokio::test]
async fn test_unprotected_agents_bypass_circuit_breakers() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("agent", ScriptedAgent::succeeding(json!(1)));

    let mut config = AgentflowConfig::for_testing();
    config.orchestrator.protect_agents_with_circuit_breakers = false;
    let orchestrator = orchestrator_with(registry, config);

    let definition =
        WorkflowDefinition::new("plain").with_step(WorkflowStep::new("a", "agent"));
    orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert!(orchestrator
        .recovery_service()
        .circuit_breakers()
        .list_components()
        .is_empty());
}
