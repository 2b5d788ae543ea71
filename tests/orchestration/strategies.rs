use crate::common::{input, orchestrator, orchestrator_with, ScriptedAgent, SlowAgent};
use agentflow_core::config::AgentflowConfig;
use agentflow_core::orchestration::{
    ExecutionResult, ExecutionStrategy, InMemoryAgentRegistry, StepCondition,
    WorkflowDefinition, WorkflowStep,
};
use agentflow_core::resilience::{ErrorType, RecoveryAction};
use agentflow_core::WorkflowStatus;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_parallel_batches_respect_max_parallel_agents() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let worker = SlowAgent::new(Duration::from_millis(30));
    registry.register("worker", worker.clone());

    let mut definition = WorkflowDefinition::new("fan-out")
        .with_strategy(ExecutionStrategy::Parallel)
        .with_max_parallel_agents(2);
    for index in 0..5 {
        definition = definition.with_step(WorkflowStep::new(format!("s{index}"), "worker"));
    }

    let result = orchestrator(registry)
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(worker.calls(), 5);
    assert_eq!(worker.max_in_flight(), 2);
    if let ExecutionResult::Success { step_results, .. } = result {
        assert_eq!(step_results.len(), 5);
        assert_eq!(step_results["s3"], json!({ "step": "s3" }));
    }
}

#[tokio::test]
async fn test_parallel_runs_independent_steps_together() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let worker = SlowAgent::new(Duration::from_millis(30));
    registry.register("worker", worker.clone());
    let joiner = ScriptedAgent::succeeding(json!("joined"));
    registry.register("joiner", joiner.clone());

    let definition = WorkflowDefinition::new("diamond")
        .with_workflow_id("wf-diamond")
        .with_strategy(ExecutionStrategy::Parallel)
        .with_step(WorkflowStep::new("a", "worker"))
        .with_step(WorkflowStep::new("b", "worker").depends_on("a"))
        .with_step(WorkflowStep::new("c", "worker").depends_on("a"))
        .with_step(
            WorkflowStep::new("d", "joiner")
                .depends_on("b")
                .depends_on("c"),
        );

    let orchestrator = orchestrator(registry);
    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(worker.max_in_flight(), 2);

    let invocation = joiner.last_invocation().unwrap();
    assert_eq!(invocation.context["steps"]["b"], json!({ "step": "b" }));
    assert_eq!(invocation.context["steps"]["c"], json!({ "step": "c" }));

    let state = orchestrator.get_status("wf-diamond").unwrap();
    assert_eq!(state.status(), WorkflowStatus::Completed);
    assert_eq!(state.completed_step_ids()[0], "a");
    assert_eq!(state.completed_step_ids()[3], "d");
    assert!(state.active_agents().is_empty());
}

#[tokio::test]
async fn test_shared_agent_stays_active_while_any_step_runs() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register_fn("worker", |invocation| async move {
        let delay = if invocation.step_id == "quick" { 10 } else { 300 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!({ "step": invocation.step_id }))
    });

    let definition = WorkflowDefinition::new("shared-agent")
        .with_workflow_id("wf-shared-agent")
        .with_strategy(ExecutionStrategy::Parallel)
        .with_step(WorkflowStep::new("quick", "worker"))
        .with_step(WorkflowStep::new("long", "worker"));

    let orchestrator = orchestrator(registry);
    let workflow_id = orchestrator
        .submit(definition, input(json!({})))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let running = orchestrator.get_status(&workflow_id).unwrap();
    assert!(running.active_agents().contains("worker"));
    assert_eq!(
        running.active_steps().keys().cloned().collect::<Vec<_>>(),
        vec!["long".to_string()]
    );

    let result = orchestrator.wait_for_result(&workflow_id).await.unwrap();
    assert!(result.is_success());
    assert!(orchestrator
        .get_status(&workflow_id)
        .unwrap()
        .active_agents()
        .is_empty());
}

#[tokio::test]
async fn test_pipeline_feeds_previous_output_forward() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register_fn("outline", |_| async { Ok(json!({ "sections": 3 })) });
    registry.register_fn("expand", |invocation| async move {
        let sections = invocation.payload["sections"].as_u64().unwrap_or(0);
        let words = invocation.payload["words_per_section"].as_u64().unwrap_or(0);
        Ok(json!({ "words": sections * words }))
    });
    registry.register_fn("count", |invocation| async move {
        Ok(invocation.payload["words"].clone())
    });

    let definition = WorkflowDefinition::new("pipeline")
        .with_strategy(ExecutionStrategy::Pipeline)
        .with_step(WorkflowStep::new("outline", "outline"))
        .with_step(
            WorkflowStep::new("expand", "expand")
                .with_input(json!({ "words_per_section": 100 })),
        )
        .with_step(WorkflowStep::new("count", "count"));

    let result = orchestrator(registry)
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert_eq!(result.step_result("expand"), Some(&json!({ "words": 300 })));
    assert_eq!(result.step_result("count"), Some(&json!(300)));
}

#[tokio::test]
async fn test_pipeline_first_step_receives_workflow_input() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let first = ScriptedAgent::succeeding(json!("ok"));
    registry.register("first", first.clone());

    let definition = WorkflowDefinition::new("pipeline")
        .with_strategy(ExecutionStrategy::Pipeline)
        .with_step(WorkflowStep::new("first", "first"));

    orchestrator(registry)
        .execute(definition, input(json!({ "seed": 7 })))
        .await
        .unwrap();

    assert_eq!(first.last_invocation().unwrap().payload, json!({ "seed": 7 }));
}

#[tokio::test]
async fn test_sequential_skips_step_with_later_dependency() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let agent = ScriptedAgent::succeeding(json!(true));
    registry.register("agent", agent.clone());

    let definition = WorkflowDefinition::new("backwards")
        .with_workflow_id("wf-backwards")
        .with_step(WorkflowStep::new("early", "agent").depends_on("late"))
        .with_step(WorkflowStep::new("late", "agent"));

    let orchestrator = orchestrator(registry);
    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    match result {
        ExecutionResult::Success {
            skipped_steps,
            step_results,
            ..
        } => {
            assert_eq!(skipped_steps, vec!["early".to_string()]);
            assert!(step_results.contains_key("late"));
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(agent.calls(), 1);
    assert_eq!(
        orchestrator.get_status("wf-backwards").unwrap().status(),
        WorkflowStatus::Completed
    );
}

#[tokio::test]
async fn test_false_condition_skips_step_and_its_dependents() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("scorer", ScriptedAgent::succeeding(json!({ "passed": false })));
    let publisher = ScriptedAgent::succeeding(json!("published"));
    registry.register("publisher", publisher.clone());
    let notifier = ScriptedAgent::succeeding(json!("notified"));
    registry.register("notifier", notifier.clone());
    let archiver = ScriptedAgent::succeeding(json!("archived"));
    registry.register("archiver", archiver.clone());

    let definition = WorkflowDefinition::new("gated")
        .with_strategy(ExecutionStrategy::Parallel)
        .with_step(WorkflowStep::new("score", "scorer"))
        .with_step(
            WorkflowStep::new("publish", "publisher")
                .depends_on("score")
                .with_condition(StepCondition::truthy("steps.score.passed")),
        )
        .with_step(WorkflowStep::new("notify", "notifier").depends_on("publish"))
        .with_step(
            WorkflowStep::new("archive", "archiver")
                .depends_on("score")
                .with_condition(StepCondition::equals("input.archive", json!(true))),
        );

    let result = orchestrator(registry)
        .execute(definition, input(json!({ "archive": true })))
        .await
        .unwrap();

    match result {
        ExecutionResult::Success { skipped_steps, .. } => {
            assert!(skipped_steps.contains(&"publish".to_string()));
            assert!(skipped_steps.contains(&"notify".to_string()));
            assert!(!skipped_steps.contains(&"archive".to_string()));
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(publisher.calls(), 0);
    assert_eq!(notifier.calls(), 0);
    assert_eq!(archiver.calls(), 1);
}

#[tokio::test]
async fn test_parallel_cycle_is_reported_as_deadlock() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let agent = ScriptedAgent::succeeding(json!(1));
    registry.register("agent", agent.clone());

    let definition = WorkflowDefinition::new("cycle")
        .with_workflow_id("wf-cycle")
        .with_strategy(ExecutionStrategy::Parallel)
        .with_step(WorkflowStep::new("free", "agent"))
        .with_step(WorkflowStep::new("a", "agent").depends_on("b"))
        .with_step(WorkflowStep::new("b", "agent").depends_on("a"));

    let orchestrator = orchestrator(registry);
    let result = orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let failure = result.error().expect("deadlock should fail the workflow");
    assert_eq!(failure.error_type, ErrorType::Configuration);
    assert_eq!(failure.recovery_action, RecoveryAction::Escalate);
    assert_eq!(failure.step_id, None);
    assert!(failure.message.contains("Deadlock"));

    assert_eq!(agent.calls(), 1);
    assert_eq!(
        orchestrator.get_status("wf-cycle").unwrap().status(),
        WorkflowStatus::Failed
    );
    assert_eq!(
        orchestrator
            .recovery_service()
            .dead_letter_queue()
            .entries_for("wf-cycle")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_default_strategy_comes_from_config() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let worker = SlowAgent::new(Duration::from_millis(30));
    registry.register("worker", worker.clone());

    let mut config = AgentflowConfig::for_testing();
    config.orchestrator.default_strategy = ExecutionStrategy::Parallel;
    config.orchestrator.max_parallel_agents = 3;

    let definition = WorkflowDefinition::new("implicit")
        .with_step(WorkflowStep::new("a", "worker"))
        .with_step(WorkflowStep::new("b", "worker"))
        .with_step(WorkflowStep::new("c", "worker"));

    let result = orchestrator_with(registry, config)
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(worker.max_in_flight(), 3);
}
