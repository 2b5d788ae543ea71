use super::states::WorkflowStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One entry of a workflow's audit trail.
///
/// Fields are private; a transition is immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    from_state: Option<WorkflowStatus>,
    to_state: WorkflowStatus,
    timestamp: DateTime<Utc>,
    acting_agent: Option<String>,
    reason: Option<String>,
    metadata: HashMap<String, Value>,
}

impl StateTransition {
    pub fn new(
        from_state: Option<WorkflowStatus>,
        to_state: WorkflowStatus,
        acting_agent: Option<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            from_state,
            to_state,
            timestamp: Utc::now(),
            acting_agent,
            reason,
            metadata: HashMap::new(),
        }
    }

    /// Creation entry: `None -> Pending`
    pub fn initial() -> Self {
        Self::new(
            None,
            WorkflowStatus::Pending,
            None,
            Some("workflow created".to_string()),
        )
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn from_state(&self) -> Option<WorkflowStatus> {
        self.from_state
    }

    pub fn to_state(&self) -> WorkflowStatus {
        self.to_state
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn acting_agent(&self) -> Option<&str> {
        self.acting_agent.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }
}
