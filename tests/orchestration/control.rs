use crate::common::{input, orchestrator, orchestrator_with, ScriptedAgent, SlowAgent};
use agentflow_core::config::AgentflowConfig;
use agentflow_core::orchestration::{InMemoryAgentRegistry, WorkflowDefinition, WorkflowStep};
use agentflow_core::{WorkflowEvent, WorkflowStatus};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn two_step(workflow_id: &str) -> WorkflowDefinition {
    WorkflowDefinition::new("two-step")
        .with_workflow_id(workflow_id)
        .with_step(WorkflowStep::new("first", "slow"))
        .with_step(WorkflowStep::new("second", "fast"))
}

#[tokio::test]
async fn test_cancel_stops_before_next_step() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("slow", SlowAgent::new(Duration::from_millis(100)));
    let fast = ScriptedAgent::succeeding(json!("fast"));
    registry.register("fast", fast.clone());

    let orchestrator = orchestrator(registry);
    let workflow_id = orchestrator
        .submit(two_step("wf-cancel"), input(json!({})))
        .unwrap();
    assert!(orchestrator.get_status(&workflow_id).is_some());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(orchestrator.cancel(&workflow_id));
    assert!(!orchestrator.cancel(&workflow_id));

    let result = orchestrator.wait_for_result(&workflow_id).await.unwrap();
    assert!(result.is_cancelled(), "unexpected result: {result:?}");
    assert_eq!(fast.calls(), 0);
    assert_eq!(
        orchestrator.get_status(&workflow_id).unwrap().status(),
        WorkflowStatus::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_before_start_never_runs_agents() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let slow = SlowAgent::new(Duration::from_millis(10));
    registry.register("slow", slow.clone());
    registry.register("fast", ScriptedAgent::succeeding(json!("fast")));

    let orchestrator = orchestrator(registry);
    let workflow_id = orchestrator
        .submit(two_step("wf-early-cancel"), input(json!({})))
        .unwrap();
    assert!(orchestrator.cancel(&workflow_id));

    let result = orchestrator.wait_for_result(&workflow_id).await.unwrap();
    assert!(result.is_cancelled());
    assert_eq!(slow.calls(), 0);
}

#[tokio::test]
async fn test_pause_holds_run_until_resumed() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("slow", SlowAgent::new(Duration::from_millis(50)));
    let fast = ScriptedAgent::succeeding(json!("fast"));
    registry.register("fast", fast.clone());

    let orchestrator = orchestrator(registry);
    let workflow_id = orchestrator
        .submit(two_step("wf-pause"), input(json!({})))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(orchestrator.pause(&workflow_id));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let paused = orchestrator.get_status(&workflow_id).unwrap();
    assert_eq!(paused.status(), WorkflowStatus::Paused);
    assert!(paused.is_step_complete("first"));
    assert_eq!(fast.calls(), 0);
    assert!(orchestrator.get_result(&workflow_id).is_none());

    assert!(orchestrator.resume(&workflow_id));
    let result = orchestrator.wait_for_result(&workflow_id).await.unwrap();
    assert!(result.is_success());
    assert_eq!(fast.calls(), 1);

    let path = orchestrator.get_status(&workflow_id).unwrap().status_path();
    assert_eq!(
        path,
        vec![
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Paused,
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn test_control_requests_on_unknown_or_finished_workflows() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("fast", ScriptedAgent::succeeding(json!(1)));
    let orchestrator = orchestrator(registry);

    assert!(!orchestrator.pause("ghost"));
    assert!(!orchestrator.resume("ghost"));
    assert!(!orchestrator.cancel("ghost"));

    let definition = WorkflowDefinition::new("done")
        .with_workflow_id("wf-done")
        .with_step(WorkflowStep::new("a", "fast"));
    orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert!(!orchestrator.pause("wf-done"));
    assert!(!orchestrator.cancel("wf-done"));
}

#[tokio::test]
async fn test_submitted_result_is_kept() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("fast", ScriptedAgent::succeeding(json!("fast")));
    let orchestrator = orchestrator(registry);

    let definition = WorkflowDefinition::new("bg").with_step(WorkflowStep::new("a", "fast"));
    let workflow_id = orchestrator.submit(definition, input(json!({}))).unwrap();

    let awaited = orchestrator.wait_for_result(&workflow_id).await.unwrap();
    let fetched = orchestrator.get_result(&workflow_id).unwrap();
    assert_eq!(awaited, fetched);
    assert_eq!(fetched.workflow_id(), workflow_id);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_submissions() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("slow", SlowAgent::new(Duration::from_millis(50)));
    registry.register("fast", ScriptedAgent::succeeding(json!("fast")));
    let orchestrator = orchestrator(registry);

    let first = orchestrator
        .submit(two_step("wf-shutdown-1"), input(json!({})))
        .unwrap();
    let second = orchestrator
        .submit(two_step("wf-shutdown-2"), input(json!({})))
        .unwrap();

    assert_eq!(orchestrator.shutdown().await, 2);
    for workflow_id in [&first, &second] {
        assert!(orchestrator.get_result(workflow_id).unwrap().is_cancelled());
    }

    let refused = orchestrator.submit(two_step("wf-shutdown-3"), input(json!({})));
    assert!(refused.is_err());
}

#[tokio::test]
async fn test_lifecycle_events_and_listeners() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("fast", ScriptedAgent::succeeding(json!(1)));
    let orchestrator = orchestrator(registry);
    let mut events = orchestrator.subscribe_events().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    orchestrator
        .state_manager()
        .add_listener(move |_state, transition| {
            sink.lock().push(transition.to_state());
            Ok(())
        });

    let definition = WorkflowDefinition::new("events")
        .with_workflow_id("wf-events")
        .with_step(WorkflowStep::new("a", "fast"));
    orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(published) = events.try_recv() {
        assert_eq!(published.event.workflow_id(), "wf-events");
        if let WorkflowEvent::StepCompleted { attempts, .. } = &published.event {
            assert_eq!(*attempts, 1);
        }
        names.push(published.event.name());
    }
    assert!(names.contains(&"workflow.state_changed"));
    assert!(names.contains(&"workflow.step_completed"));

    assert_eq!(
        *seen.lock(),
        vec![WorkflowStatus::Running, WorkflowStatus::Completed]
    );
}

#[tokio::test]
async fn test_retention_sweep_drops_finished_workflows() {
    let registry = Arc::new(InMemoryAgentRegistry::new());
    registry.register("fast", ScriptedAgent::succeeding(json!(1)));

    let mut config = AgentflowConfig::for_testing();
    config.state.retention_hours = 0;
    let orchestrator = orchestrator_with(registry, config);

    let definition = WorkflowDefinition::new("short-lived")
        .with_workflow_id("wf-short")
        .with_step(WorkflowStep::new("a", "fast"));
    orchestrator
        .execute(definition, input(json!({})))
        .await
        .unwrap();

    assert_eq!(orchestrator.run_retention_sweep(), vec!["wf-short".to_string()]);
    assert!(orchestrator.get_status("wf-short").is_none());
    assert!(orchestrator.get_result("wf-short").is_none());
}
