//! Events emitted to the optional external sink.

use crate::resilience::{ErrorRecord, RecoveryDecision};
use crate::state_machine::StateTransition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StateChanged {
        workflow_id: String,
        transition: StateTransition,
    },
    StepCompleted {
        workflow_id: String,
        step_id: String,
        agent_name: String,
        attempts: u32,
    },
    StepFailed {
        workflow_id: String,
        step_id: String,
        agent_name: String,
        error: Value,
    },
    StepSkipped {
        workflow_id: String,
        step_id: String,
        reason: String,
    },
    ErrorRecorded {
        record: ErrorRecord,
    },
    RecoveryDecided {
        error_id: String,
        workflow_id: String,
        decision: RecoveryDecision,
    },
    DeadLettered {
        workflow_id: String,
        error_id: String,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "workflow.state_changed",
            Self::StepCompleted { .. } => "workflow.step_completed",
            Self::StepFailed { .. } => "workflow.step_failed",
            Self::StepSkipped { .. } => "workflow.step_skipped",
            Self::ErrorRecorded { .. } => "recovery.error_recorded",
            Self::RecoveryDecided { .. } => "recovery.decision",
            Self::DeadLettered { .. } => "recovery.dead_lettered",
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Self::StateChanged { workflow_id, .. }
            | Self::StepCompleted { workflow_id, .. }
            | Self::StepFailed { workflow_id, .. }
            | Self::StepSkipped { workflow_id, .. }
            | Self::RecoveryDecided { workflow_id, .. }
            | Self::DeadLettered { workflow_id, .. } => workflow_id,
            Self::ErrorRecorded { record } => &record.workflow_id,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: WorkflowEvent,
    pub published_at: DateTime<Utc>,
}
