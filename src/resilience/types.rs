//! Shared vocabulary of the recovery layer: error taxonomy, severity, the
//! recorded error, and the decision handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Failure category; selects the recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Transient,
    Persistent,
    Configuration,
    Network,
    Authentication,
    ResourceExhaustion,
    DataCorruption,
    AgentFailure,
    ExternalDeliveryError,
    PersistenceError,
    ValidationError,
    Timeout,
    Unknown,
}

impl ErrorType {
    pub const ALL: [ErrorType; 13] = [
        Self::Transient,
        Self::Persistent,
        Self::Configuration,
        Self::Network,
        Self::Authentication,
        Self::ResourceExhaustion,
        Self::DataCorruption,
        Self::AgentFailure,
        Self::ExternalDeliveryError,
        Self::PersistenceError,
        Self::ValidationError,
        Self::Timeout,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Persistent => "persistent",
            Self::Configuration => "configuration",
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::DataCorruption => "data_corruption",
            Self::AgentFailure => "agent_failure",
            Self::ExternalDeliveryError => "external_delivery_error",
            Self::PersistenceError => "persistence_error",
            Self::ValidationError => "validation_error",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Types that are never worth retrying automatically and go straight to
    /// the dead-letter queue once no retry strategy applies.
    pub fn requires_escalation(&self) -> bool {
        matches!(
            self,
            Self::Persistent | Self::Configuration | Self::Authentication
        )
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|error_type| error_type.as_str() == s)
            .ok_or_else(|| format!("Unknown error type: {s}"))
    }
}

/// Observability routing level, orthogonal to [`ErrorType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Where a failure happened, supplied by the caller of `classify`/`record`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub step_id: Option<String>,
    pub agent_name: Option<String>,
    pub phase: Option<String>,
    /// Escalation-level retries already performed for this failure
    pub retry_count: u32,
    pub metadata: HashMap<String, Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_step(step_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            agent_name: Some(agent_name.into()),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A classified, logged failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Correlation id surfaced to callers
    pub error_id: String,
    pub workflow_id: String,
    pub error_type: ErrorType,
    pub severity: Severity,
    pub message: String,
    pub context: HashMap<String, Value>,
    pub retry_count: u32,
    pub agent_name: Option<String>,
    pub phase: Option<String>,
    pub step_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        workflow_id: impl Into<String>,
        error_type: ErrorType,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            error_type,
            severity,
            message: message.into(),
            context: HashMap::new(),
            retry_count: 0,
            agent_name: None,
            phase: None,
            step_id: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// What the caller should do with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Try again after `retry_after`
    Retry,
    /// Take the caller-supplied alternative path
    Fallback,
    /// Undo what was done so far
    Rollback,
    /// Give up, park the error in the dead-letter queue
    Escalate,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::Fallback => write!(f, "fallback"),
            Self::Rollback => write!(f, "rollback"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub action: RecoveryAction,
    pub retry_after: Option<Duration>,
    pub metadata: HashMap<String, Value>,
}

impl RecoveryDecision {
    pub fn new(action: RecoveryAction) -> Self {
        Self {
            action,
            retry_after: None,
            metadata: HashMap::new(),
        }
    }

    pub fn retry_after(delay: Duration) -> Self {
        Self {
            action: RecoveryAction::Retry,
            retry_after: Some(delay),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
