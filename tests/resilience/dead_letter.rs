use agentflow_core::resilience::{DeadLetterQueue, ErrorRecord, ErrorType, Severity};

fn record(workflow_id: &str) -> ErrorRecord {
    ErrorRecord::new(workflow_id, ErrorType::Persistent, Severity::High, "gave up")
}

#[test]
fn test_capacity_evicts_oldest() {
    let queue = DeadLetterQueue::new(3);
    for index in 0..3 {
        assert!(queue.add(format!("wf-{index}"), record(&format!("wf-{index}"))).is_none());
    }

    let evicted = queue.add("wf-3", record("wf-3")).expect("oldest evicted");
    assert_eq!(evicted.workflow_id, "wf-0");
    assert_eq!(queue.len(), 3);
    assert!(queue.entries_for("wf-0").is_empty());
    assert_eq!(queue.entries_for("wf-3").len(), 1);
}

#[test]
fn test_retry_bookkeeping() {
    let queue = DeadLetterQueue::new(10);
    queue.add("wf-a", record("wf-a"));
    queue.add("wf-b", record("wf-b"));
    assert_eq!(queue.get_retry_eligible().len(), 2);

    assert!(queue.mark_retried("wf-a"));
    let first_retry = queue.entries_for("wf-a")[0].retried_at;
    assert!(first_retry.is_some());

    assert!(queue.mark_retried("wf-a"));
    assert_eq!(queue.entries_for("wf-a")[0].retried_at, first_retry);
    assert!(!queue.mark_retried("wf-unknown"));

    let eligible = queue.get_retry_eligible();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].workflow_id, "wf-b");

    assert_eq!(queue.clear(), 2);
    assert!(queue.is_empty());
}
