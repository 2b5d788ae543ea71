//! Shared helpers for integration tests: scripted agents and wiring.

#![allow(dead_code)]


pub use agents::*;

use agentflow_core::config::AgentflowConfig;
use agentflow_core::orchestration::{InMemoryAgentRegistry, WorkflowOrchestrator};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Orchestrator over `registry` with fast, jitter-free settings
pub fn orchestrator(registry: Arc<InMemoryAgentRegistry>) -> WorkflowOrchestrator {
    orchestrator_with(registry, AgentflowConfig::for_testing())
}

pub fn orchestrator_with(
    registry: Arc<InMemoryAgentRegistry>,
    config: AgentflowConfig,
) -> WorkflowOrchestrator {
    WorkflowOrchestrator::from_config(registry, &config).expect("test config is valid")
}

/// Object input from a `json!` literal
pub fn input(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("test input must be an object, got {other}"),
    }
}
