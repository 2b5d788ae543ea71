#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Agentflow Core
//!
//! Resilient orchestration core for multi-agent workflows.
//!
//! ## Overview
//!
//! A workflow is an ordered list of steps, each delegated to a named agent.
//! The core decides which steps run and when, keeps an auditable record of
//! every workflow's lifecycle, and turns agent failures into explicit
//! recovery decisions instead of crashes.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Orchestrator, state manager, step execution and the
//!   agent registry
//! - [`resilience`] - Circuit breakers, error classification, retry policy,
//!   dead-letter queue and the recovery service
//! - [`state_machine`] - Workflow statuses, the transition table and the
//!   persistence hook
//! - [`models`] - The per-workflow state snapshot
//! - [`events`] - Lifecycle and recovery events for external sinks
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate and step error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentflow_core::config::ConfigManager;
//! use agentflow_core::orchestration::{
//!     ExecutionStrategy, InMemoryAgentRegistry, WorkflowDefinition, WorkflowOrchestrator,
//!     WorkflowStep,
//! };
//! use serde_json::{json, Map};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! agentflow_core::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//!
//! let registry = Arc::new(InMemoryAgentRegistry::new());
//! registry.register_fn("research", |_| async { Ok(json!({ "sources": 3 })) });
//! registry.register_fn("write", |invocation| async move {
//!     Ok(json!({ "based_on": invocation.payload }))
//! });
//!
//! let orchestrator = WorkflowOrchestrator::from_config(registry, manager.config())?;
//! let definition = WorkflowDefinition::new("article")
//!     .with_strategy(ExecutionStrategy::Pipeline)
//!     .with_step(WorkflowStep::new("research", "research"))
//!     .with_step(WorkflowStep::new("write", "write").depends_on("research"));
//!
//! let result = orchestrator.execute(definition, Map::new()).await?;
//! println!("succeeded: {}", result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod state_machine;

pub use config::{AgentflowConfig, ConfigManager};
pub use error::{AgentflowError, Result, StepError};
pub use events::{EventPublisher, WorkflowEvent};
pub use models::WorkflowState;
pub use orchestration::{
    ExecutionResult, ExecutionStrategy, WorkflowDefinition, WorkflowOrchestrator,
    WorkflowStateManager, WorkflowStep,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerManager, DeadLetterQueue, ErrorRecoveryService, ErrorType,
    RecoveryAction, RetryPolicy,
};
pub use state_machine::{StateTransition, WorkflowStatus};
