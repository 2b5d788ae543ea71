//! # Models
//!
//! Data carried through the orchestration core: the per-execution
//! [`WorkflowState`] snapshot owned by the state manager.

pub mod workflow_state;

pub use workflow_state::WorkflowState;
