use agentflow_core::orchestration::{RetryReentryPolicy, WorkflowStateManager};
use agentflow_core::{AgentflowError, WorkflowStatus};
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::sync::Arc;

const ALL: [WorkflowStatus; 6] = [
    WorkflowStatus::Pending,
    WorkflowStatus::Running,
    WorkflowStatus::Paused,
    WorkflowStatus::Completed,
    WorkflowStatus::Failed,
    WorkflowStatus::Cancelled,
];

/// Drive a fresh workflow into `status` through legal moves only
fn workflow_in(manager: &WorkflowStateManager, id: &str, status: WorkflowStatus) {
    manager.create(id, Map::new(), 2).unwrap();
    let path: &[WorkflowStatus] = match status {
        WorkflowStatus::Pending => &[],
        WorkflowStatus::Running => &[WorkflowStatus::Running],
        WorkflowStatus::Paused => &[WorkflowStatus::Running, WorkflowStatus::Paused],
        WorkflowStatus::Completed => &[WorkflowStatus::Running, WorkflowStatus::Completed],
        WorkflowStatus::Failed => &[WorkflowStatus::Running, WorkflowStatus::Failed],
        WorkflowStatus::Cancelled => &[WorkflowStatus::Cancelled],
    };
    for next in path {
        manager.transition(id, *next, Some("test"), None).unwrap();
    }
}

#[test]
fn test_only_table_transitions_are_accepted() {
    let manager = WorkflowStateManager::new();
    for (from_index, from) in ALL.iter().enumerate() {
        for (to_index, to) in ALL.iter().enumerate() {
            let id = format!("wf-{from_index}-{to_index}");
            workflow_in(&manager, &id, *from);

            let outcome = manager.transition(&id, *to, Some("test"), None);
            if from.can_transition_to(*to) {
                assert!(outcome.unwrap(), "{from} -> {to} should be legal");
                assert_eq!(manager.get(&id).unwrap().status(), *to);
            } else {
                assert!(
                    matches!(outcome, Err(AgentflowError::InvalidTransition { .. })),
                    "{from} -> {to} should be rejected"
                );
                assert_eq!(manager.get(&id).unwrap().status(), *from);
            }
        }
    }
}

#[test]
fn test_transition_on_unknown_workflow_fails() {
    let manager = WorkflowStateManager::new();
    let outcome = manager.transition("ghost", WorkflowStatus::Running, None, None);
    assert!(matches!(outcome, Err(AgentflowError::NotFound(_))));
}

#[test]
fn test_step_bookkeeping_completes_workflow() {
    let manager = WorkflowStateManager::new();
    workflow_in(&manager, "wf", WorkflowStatus::Running);

    assert!(manager.mark_step_complete("wf", "a", Some(json!(1))).unwrap());
    assert!(!manager.mark_step_complete("wf", "a", Some(json!(2))).unwrap());
    assert_eq!(manager.get("wf").unwrap().output_data()["a"], json!(1));
    assert_eq!(manager.get("wf").unwrap().status(), WorkflowStatus::Running);

    assert!(manager.mark_step_complete("wf", "b", None).unwrap());
    let state = manager.get("wf").unwrap();
    assert_eq!(state.status(), WorkflowStatus::Completed);
    assert_eq!(state.completed_step_ids().to_vec(), vec!["a", "b"]);
    assert!(state.completed_at().is_some());
}

#[test]
fn test_retry_reentry_policies() {
    for (policy, keeps_failures) in [
        (RetryReentryPolicy::ClearFailures, false),
        (RetryReentryPolicy::PreserveBookkeeping, true),
    ] {
        let manager = WorkflowStateManager::new().with_reentry_policy(policy);
        workflow_in(&manager, "wf", WorkflowStatus::Running);
        manager.mark_step_complete("wf", "a", None).unwrap();
        manager
            .mark_step_failed("wf", "b", Some(json!({ "message": "boom" })))
            .unwrap();
        manager
            .transition("wf", WorkflowStatus::Failed, None, Some("step b failed"))
            .unwrap();

        manager
            .transition("wf", WorkflowStatus::Running, Some("operator"), Some("retry"))
            .unwrap();

        let state = manager.get("wf").unwrap();
        assert!(state.is_step_complete("a"));
        assert_eq!(state.is_step_failed("b"), keeps_failures, "{policy:?}");
        assert_eq!(state.error_data().contains_key("b"), keeps_failures, "{policy:?}");
    }
}

#[test]
fn test_failing_listeners_do_not_block_others() {
    let manager = WorkflowStateManager::new();
    workflow_in(&manager, "wf", WorkflowStatus::Pending);
    workflow_in(&manager, "other", WorkflowStatus::Pending);

    let seen = Arc::new(Mutex::new(Vec::new()));
    manager.subscribe("wf", |_, _| anyhow::bail!("listener error"));
    manager.subscribe("wf", |_, _| panic!("listener panic"));
    let recorder = Arc::clone(&seen);
    manager.subscribe("wf", move |state, transition| {
        recorder
            .lock()
            .push((state.workflow_id().to_string(), transition.to_state()));
        Ok(())
    });

    manager.transition("wf", WorkflowStatus::Running, None, None).unwrap();
    manager.transition("other", WorkflowStatus::Running, None, None).unwrap();
    manager.transition("wf", WorkflowStatus::Paused, None, None).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            ("wf".to_string(), WorkflowStatus::Running),
            ("wf".to_string(), WorkflowStatus::Paused),
        ]
    );
    assert_eq!(manager.get("wf").unwrap().status(), WorkflowStatus::Paused);
}

#[test]
fn test_listener_may_drive_a_follow_up_transition() {
    let manager = Arc::new(WorkflowStateManager::new());
    workflow_in(&manager, "wf", WorkflowStatus::Pending);

    let handle = Arc::downgrade(&manager);
    manager.subscribe("wf", move |state, transition| {
        if transition.to_state() == WorkflowStatus::Running {
            if let Some(manager) = handle.upgrade() {
                manager.transition(state.workflow_id(), WorkflowStatus::Paused, None, None)?;
            }
        }
        Ok(())
    });

    manager.transition("wf", WorkflowStatus::Running, None, None).unwrap();
    assert_eq!(manager.get("wf").unwrap().status(), WorkflowStatus::Paused);
}

#[test]
fn test_unsubscribed_listener_stops_receiving() {
    let manager = WorkflowStateManager::new();
    workflow_in(&manager, "wf", WorkflowStatus::Pending);

    let count = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&count);
    let id = manager.add_listener(move |_, _| {
        *counter.lock() += 1;
        Ok(())
    });

    manager.transition("wf", WorkflowStatus::Running, None, None).unwrap();
    assert!(manager.unsubscribe(id));
    assert!(!manager.unsubscribe(id));
    manager.transition("wf", WorkflowStatus::Paused, None, None).unwrap();

    assert_eq!(*count.lock(), 1);
}
