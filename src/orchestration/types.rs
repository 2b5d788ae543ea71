//! # Orchestration Types
//!
//! Workflow definitions as submitted by callers, the step conditions they may
//! carry, and the discriminated result handed back by the orchestrator.

use crate::error::{AgentflowError, Result};
use crate::resilience::{ErrorType, RecoveryAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Step ordering and parallelism policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Declaration order, one step at a time
    #[default]
    Sequential,
    /// Ready-set batches bounded by `max_parallel_agents`
    Parallel,
    /// Declaration order, each step fed the previous step's output
    Pipeline,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Predicate over the workflow-visible context.
///
/// Paths are dotted lookups into the condition view:
/// `input.<field>...`, `steps.<step_id>.<field>...` and
/// `context.<key>...` (global and workflow scoped entries only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepCondition {
    Exists { path: String },
    Equals { path: String, value: Value },
    NotEquals { path: String, value: Value },
    Truthy { path: String },
    All { conditions: Vec<StepCondition> },
    Any { conditions: Vec<StepCondition> },
    Not { condition: Box<StepCondition> },
}

impl StepCondition {
    pub fn exists(path: impl Into<String>) -> Self {
        Self::Exists { path: path.into() }
    }

    pub fn equals(path: impl Into<String>, value: Value) -> Self {
        Self::Equals {
            path: path.into(),
            value,
        }
    }

    pub fn not_equals(path: impl Into<String>, value: Value) -> Self {
        Self::NotEquals {
            path: path.into(),
            value,
        }
    }

    pub fn truthy(path: impl Into<String>) -> Self {
        Self::Truthy { path: path.into() }
    }

    pub fn negate(condition: StepCondition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    pub fn evaluate(&self, view: &Value) -> bool {
        match self {
            Self::Exists { path } => lookup(view, path).is_some(),
            Self::Equals { path, value } => lookup(view, path) == Some(value),
            Self::NotEquals { path, value } => lookup(view, path) != Some(value),
            Self::Truthy { path } => lookup(view, path).map_or(false, is_truthy),
            Self::All { conditions } => conditions.iter().all(|c| c.evaluate(view)),
            Self::Any { conditions } => conditions.iter().any(|c| c.evaluate(view)),
            Self::Not { condition } => !condition.evaluate(view),
        }
    }
}

/// Dotted path lookup; numeric segments index into arrays
pub fn lookup<'a>(view: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(view, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// One unit of work delegated to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    /// Registry lookup key
    pub agent_name: String,
    #[serde(default)]
    pub input_payload: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// All must hold; a false condition skips the step
    #[serde(default)]
    pub conditions: Vec<StepCondition>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Local retries after the first attempt
    #[serde(default)]
    pub max_retries: u32,
    /// Agent used when recovery decides on fallback
    #[serde(default)]
    pub fallback_agent: Option<String>,
}

impl WorkflowStep {
    pub fn new(step_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            agent_name: agent_name.into(),
            input_payload: Value::Null,
            dependencies: Vec::new(),
            conditions: Vec::new(),
            timeout: None,
            max_retries: 0,
            fallback_agent: None,
        }
    }

    pub fn with_input(mut self, payload: Value) -> Self {
        self.input_payload = payload;
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_fallback_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.fallback_agent = Some(agent_name.into());
        self
    }

    pub fn conditions_hold(&self, view: &Value) -> bool {
        self.conditions.iter().all(|condition| condition.evaluate(view))
    }
}

/// A workflow as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    /// Generated when absent
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub steps: Vec<WorkflowStep>,
    /// Falls back to the orchestrator's configured default
    #[serde(default)]
    pub strategy: Option<ExecutionStrategy>,
    #[serde(default)]
    pub max_parallel_agents: Option<usize>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workflow_id: None,
            steps: Vec::new(),
            strategy: None,
            max_parallel_agents: None,
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_max_parallel_agents(mut self, max_parallel_agents: usize) -> Self {
        self.max_parallel_agents = Some(max_parallel_agents);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// Structural checks. Dependency cycles are not rejected here; they
    /// surface at run time as a deadlock (parallel) or as skipped steps.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(AgentflowError::InvalidDefinition(reason));

        if self.steps.is_empty() {
            return invalid(format!("workflow '{}' has no steps", self.name));
        }
        if self.max_parallel_agents == Some(0) {
            return invalid("max_parallel_agents must be greater than 0".to_string());
        }

        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if step.step_id.trim().is_empty() {
                return invalid("step_id must not be empty".to_string());
            }
            if step.agent_name.trim().is_empty() {
                return invalid(format!("step '{}' has no agent_name", step.step_id));
            }
            if !seen.insert(step.step_id.as_str()) {
                return invalid(format!("duplicate step_id '{}'", step.step_id));
            }
        }

        for step in &self.steps {
            for dependency in &step.dependencies {
                if dependency == &step.step_id {
                    return invalid(format!("step '{}' depends on itself", step.step_id));
                }
                if !seen.contains(dependency.as_str()) {
                    return invalid(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.step_id, dependency
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Caller-facing description of why a workflow failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Correlation id of the last recorded error
    pub error_id: String,
    pub error_type: ErrorType,
    pub message: String,
    pub step_id: Option<String>,
    pub recovery_action: RecoveryAction,
}

/// Outcome of one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        workflow_id: String,
        /// Output of every completed step keyed by step_id
        step_results: HashMap<String, Value>,
        skipped_steps: Vec<String>,
        duration: Duration,
    },
    Error {
        workflow_id: String,
        error: ExecutionFailure,
        completed_steps: Vec<String>,
        duration: Duration,
    },
    Cancelled {
        workflow_id: String,
        completed_steps: Vec<String>,
        duration: Duration,
    },
}

impl ExecutionResult {
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::Success { workflow_id, .. }
            | Self::Error { workflow_id, .. }
            | Self::Cancelled { workflow_id, .. } => workflow_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn error(&self) -> Option<&ExecutionFailure> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn step_result(&self, step_id: &str) -> Option<&Value> {
        match self {
            Self::Success { step_results, .. } => step_results.get(step_id),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Success { duration, .. }
            | Self::Error { duration, .. }
            | Self::Cancelled { duration, .. } => *duration,
        }
    }
}
