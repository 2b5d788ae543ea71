//! # Agent Registry
//!
//! Maps a step's `agent_name` to the unit of work that executes it. Agents
//! receive an [`AgentInvocation`] and either return a JSON result or raise a
//! [`StepError`].

use crate::error::StepError;
use crate::orchestration::context::{ContextAccessor, ContextScope, WorkflowContext};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Everything an agent is handed for one attempt
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub workflow_id: String,
    pub step_id: String,
    pub agent_name: String,
    /// 1-based attempt number within the current local retry loop
    pub attempt: u32,
    pub payload: Value,
    /// Input, step outputs and the context entries this agent may read
    pub context: Value,
    shared: Arc<WorkflowContext>,
}

impl AgentInvocation {
    pub fn new(
        step_id: impl Into<String>,
        agent_name: impl Into<String>,
        attempt: u32,
        payload: Value,
        shared: Arc<WorkflowContext>,
    ) -> Self {
        let step_id = step_id.into();
        let agent_name = agent_name.into();
        let context = shared.snapshot_for(&ContextAccessor::for_step(&step_id, &agent_name));
        Self {
            workflow_id: shared.workflow_id().to_string(),
            step_id,
            agent_name,
            attempt,
            payload,
            context,
            shared,
        }
    }

    fn accessor(&self) -> ContextAccessor {
        ContextAccessor::for_step(&self.step_id, &self.agent_name)
    }

    /// Live read through the workflow context, honouring scope visibility
    pub fn read(&self, key: &str) -> Option<Value> {
        self.shared.get(key, &self.accessor())
    }

    /// Write visible only to this agent
    pub fn write_private(&self, key: impl Into<String>, value: Value) {
        self.shared.set(
            key,
            value,
            ContextScope::Agent(self.agent_name.clone()),
            Some(&self.agent_name),
        );
    }

    /// Write visible only to this step
    pub fn write_task(&self, key: impl Into<String>, value: Value) {
        self.shared.set(
            key,
            value,
            ContextScope::Task(self.step_id.clone()),
            Some(&self.agent_name),
        );
    }

    /// Write visible to every step of the workflow
    pub fn write_shared(&self, key: impl Into<String>, value: Value) {
        self.shared
            .set(key, value, ContextScope::Workflow, Some(&self.agent_name));
    }

    /// Make one of this agent's private entries visible workflow-wide
    pub fn promote(&self, key: &str) -> bool {
        self.shared
            .promote(key, &ContextScope::Agent(self.agent_name.clone()))
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<Value, StepError>;
}

/// Agent backed by an async closure
pub struct FnAgent<F> {
    handler: F,
}

impl<F> FnAgent<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(AgentInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    async fn invoke(&self, invocation: AgentInvocation) -> Result<Value, StepError> {
        (self.handler)(invocation).await
    }
}

pub trait AgentRegistry: Send + Sync {
    fn resolve(&self, agent_name: &str) -> Option<Arc<dyn Agent>>;

    fn agent_names(&self) -> Vec<String>;
}

/// Thread-safe in-process registry
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: DashMap<String, Arc<dyn Agent>>,
}

impl std::fmt::Debug for InMemoryAgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAgentRegistry")
            .field("agents", &self.agent_names())
            .finish()
    }
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any previous one under the same name
    pub fn register(&self, agent_name: impl Into<String>, agent: Arc<dyn Agent>) {
        let agent_name = agent_name.into();
        tracing::debug!(agent = %agent_name, "Registering agent");
        self.agents.insert(agent_name, agent);
    }

    pub fn register_fn<F, Fut>(&self, agent_name: impl Into<String>, handler: F)
    where
        F: Fn(AgentInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.register(agent_name, Arc::new(FnAgent::new(handler)));
    }

    pub fn unregister(&self, agent_name: &str) -> bool {
        self.agents.remove(agent_name).is_some()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn resolve(&self, agent_name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(agent_name).map(|entry| entry.value().clone())
    }

    fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
