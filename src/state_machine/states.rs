use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, no step dispatched yet
    #[default]
    Pending,
    /// Steps are being dispatched
    Running,
    /// Dispatch suspended until resumed
    Paused,
    /// All steps finished successfully
    Completed,
    /// An unrecovered step failure stopped the workflow
    Failed,
    /// Stopped on request
    Cancelled,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses reachable from this one.
    ///
    /// Failed -> Running is the explicit retry re-entry; Completed and
    /// Cancelled accept nothing.
    pub fn allowed_transitions(&self) -> &'static [WorkflowStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Paused, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Paused => &[Self::Running, Self::Cancelled],
            Self::Failed => &[Self::Running],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: WorkflowStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// No further transitions allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Finished, successfully or not. Stamps `completed_at` and makes the
    /// workflow eligible for the retention sweep.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid workflow status: {s}")),
        }
    }
}
