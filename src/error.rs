//! Error types for the orchestration core.
//!
//! Two families live here. [`AgentflowError`] is returned by the core's own
//! operations (state manager, orchestrator, configuration). [`StepError`] is the
//! failure contract for agents: whatever a unit of work raises is expressed as a
//! `StepError` and handed to the error classifier.

use crate::state_machine::WorkflowStatus;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentflowError {
    #[error("Workflow already exists: {0}")]
    AlreadyExists(String),
    #[error("Workflow not found: {0}")]
    NotFound(String),
    #[error("Invalid state transition for workflow {workflow_id}: {from} -> {to}")]
    InvalidTransition {
        workflow_id: String,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),
    #[error("Deadlock detected in workflow {workflow_id}: pending steps {pending:?} can never become ready")]
    Deadlock {
        workflow_id: String,
        pending: Vec<String>,
    },
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),
    #[error("Agent not registered: {0}")]
    AgentNotFound(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AgentflowError {
    fn from(error: serde_json::Error) -> Self {
        AgentflowError::Serialization(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for AgentflowError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        AgentflowError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentflowError>;

/// Failure raised by an agent while executing a step.
///
/// Variants carry the categories the classifier chain understands directly;
/// `Failed` is the catch-all whose message and code are inspected by keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    #[error("Transient failure: {message}")]
    Transient { message: String },
    #[error("Persistent failure: {message}")]
    Persistent { message: String },
    #[error("Step timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("Network error: {message}")]
    Network { message: String },
    #[error("Authentication failed: {message}")]
    Authentication { message: String },
    #[error("Configuration error: {message}")]
    Configuration { message: String },
    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },
    #[error("Data corruption detected: {message}")]
    DataCorruption { message: String },
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },
    #[error("Persistence failure during {operation}: {message}")]
    Persistence { operation: String, message: String },
    #[error("External delivery failed via {channel}: {message}")]
    Delivery { channel: String, message: String },
    #[error("Agent {agent} failed: {message}")]
    AgentFailure { agent: String, message: String },
    #[error("Circuit breaker open for {dependency}")]
    CircuitOpen { dependency: String },
    #[error("Deadlock: steps {pending:?} can never become ready")]
    Deadlock { pending: Vec<String> },
    #[error("{message}")]
    Failed {
        message: String,
        code: Option<String>,
    },
}

impl StepError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self::Persistent {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            code: None,
        }
    }

    pub fn failed_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Short stable name of the variant, used in logs and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Persistent { .. } => "persistent",
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::Authentication { .. } => "authentication",
            Self::Configuration { .. } => "configuration",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::DataCorruption { .. } => "data_corruption",
            Self::Validation { .. } => "validation",
            Self::Persistence { .. } => "persistence",
            Self::Delivery { .. } => "delivery",
            Self::AgentFailure { .. } => "agent_failure",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Deadlock { .. } => "deadlock",
            Self::Failed { .. } => "failed",
        }
    }
}

impl From<AgentflowError> for StepError {
    fn from(error: AgentflowError) -> Self {
        match error {
            AgentflowError::CircuitOpen(dependency) => StepError::CircuitOpen { dependency },
            AgentflowError::Deadlock { pending, .. } => StepError::Deadlock { pending },
            AgentflowError::Configuration(message) | AgentflowError::AgentNotFound(message) => {
                StepError::Configuration { message }
            }
            AgentflowError::Persistence(message) => StepError::Persistence {
                operation: "state_store".to_string(),
                message,
            },
            other => StepError::failed(other.to_string()),
        }
    }
}
