//! # Orchestration Engine
//!
//! Coordinates multi-agent workflows: decides which steps run and when,
//! delegates each step to a registered agent, and routes failures through
//! the resilience layer.
//!
//! ## Core Components
//!
//! - **WorkflowOrchestrator**: entry point; runs definitions under the
//!   sequential, parallel or pipeline strategy and exposes pause, resume,
//!   cancel and background submission
//! - **WorkflowStateManager**: sole owner of workflow state; enforces the
//!   transition table and notifies listeners
//! - **StepExecutor**: one step end to end, including timeouts, local
//!   retries, circuit breakers and recovery decisions
//! - **ViableStepDiscovery**: ready sets, skips and deadlock detection
//! - **WorkflowContext**: shared data with scoped visibility
//! - **AgentRegistry**: maps agent names to units of work

pub mod context;
pub mod orchestrator;
pub mod registry;
pub mod state_manager;
pub mod step_executor;
pub mod types;
pub mod viable_step_discovery;

pub use context::{ContextAccessor, ContextEntry, ContextScope, WorkflowContext};
pub use orchestrator::WorkflowOrchestrator;
pub use registry::{Agent, AgentInvocation, AgentRegistry, FnAgent, InMemoryAgentRegistry};
pub use state_manager::{ListenerId, RetryReentryPolicy, StateListener, WorkflowStateManager};
pub use step_executor::{StepExecutionConfig, StepExecutor, StepOutcome};
pub use types::{
    ExecutionFailure, ExecutionResult, ExecutionStrategy, StepCondition, WorkflowDefinition,
    WorkflowStep,
};
pub use viable_step_discovery::{
    Discovery, ExecutionProgress, SkipReason, StepReadiness, ViableStepDiscovery,
};
