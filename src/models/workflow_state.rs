//! # Workflow State
//!
//! One execution instance: identity, status, timestamps, progress counters,
//! step bookkeeping, opaque payloads and the append-only transition history.
//!
//! Everything that must survive a trip through a [`StateStore`] is a serialized
//! field. Mutation is crate-private; callers only ever hold snapshots handed out
//! by the state manager.
//!
//! [`StateStore`]: crate::state_machine::StateStore

use crate::state_machine::{StateTransition, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    workflow_id: String,
    status: WorkflowStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    total_steps: usize,
    completed_steps: usize,
    /// Agent currently running each in-flight step, keyed by step id
    active_steps: BTreeMap<String, String>,
    /// Completion order is kept; rollback metadata reports it.
    completed_step_ids: Vec<String>,
    failed_step_ids: BTreeSet<String>,
    input_data: Map<String, Value>,
    output_data: Map<String, Value>,
    error_data: Map<String, Value>,
    state_history: Vec<StateTransition>,
}

impl WorkflowState {
    pub(crate) fn new(
        workflow_id: impl Into<String>,
        input_data: Map<String, Value>,
        total_steps: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            total_steps,
            completed_steps: 0,
            active_steps: BTreeMap::new(),
            completed_step_ids: Vec::new(),
            failed_step_ids: BTreeSet::new(),
            input_data,
            output_data: Map::new(),
            error_data: Map::new(),
            state_history: vec![StateTransition::initial()],
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn completed_steps(&self) -> usize {
        self.completed_steps
    }

    /// Completion percentage in `[0.0, 100.0]`; an empty workflow reports 100
    /// once completed and 0 otherwise.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return if self.status == WorkflowStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        (self.completed_steps as f64 / self.total_steps as f64 * 100.0).min(100.0)
    }

    /// Agents with at least one step in flight
    pub fn active_agents(&self) -> BTreeSet<String> {
        self.active_steps.values().cloned().collect()
    }

    pub fn active_steps(&self) -> &BTreeMap<String, String> {
        &self.active_steps
    }

    pub fn completed_step_ids(&self) -> &[String] {
        &self.completed_step_ids
    }

    pub fn failed_step_ids(&self) -> &BTreeSet<String> {
        &self.failed_step_ids
    }

    pub fn is_step_complete(&self, step_id: &str) -> bool {
        self.completed_step_ids.iter().any(|id| id == step_id)
    }

    pub fn is_step_failed(&self, step_id: &str) -> bool {
        self.failed_step_ids.contains(step_id)
    }

    pub fn input_data(&self) -> &Map<String, Value> {
        &self.input_data
    }

    pub fn output_data(&self) -> &Map<String, Value> {
        &self.output_data
    }

    pub fn error_data(&self) -> &Map<String, Value> {
        &self.error_data
    }

    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    /// Sequence of statuses the workflow has passed through, creation first.
    pub fn status_path(&self) -> Vec<WorkflowStatus> {
        self.state_history.iter().map(|t| t.to_state()).collect()
    }

    // -- crate-private mutation, only reached through WorkflowStateManager --

    pub(crate) fn apply_transition(&mut self, transition: StateTransition) {
        let to_state = transition.to_state();
        let at = transition.timestamp();

        if to_state == WorkflowStatus::Running && self.started_at.is_none() {
            self.started_at = Some(at);
        }
        if to_state.is_finished() {
            self.completed_at = Some(at);
        } else {
            self.completed_at = None;
        }

        self.status = to_state;
        self.updated_at = at;
        self.state_history.push(transition);
    }

    /// Returns `true` when the step was not already complete.
    pub(crate) fn record_step_complete(&mut self, step_id: &str) -> bool {
        if self.is_step_complete(step_id) {
            return false;
        }
        self.completed_step_ids.push(step_id.to_string());
        self.failed_step_ids.remove(step_id);
        self.completed_steps += 1;
        self.touch();
        true
    }

    /// Returns `true` when the step was not already marked failed.
    pub(crate) fn record_step_failed(&mut self, step_id: &str) -> bool {
        if self.failed_step_ids.contains(step_id) {
            return false;
        }
        self.failed_step_ids.insert(step_id.to_string());
        self.touch();
        true
    }

    /// Returns `true` when `step_id` was not already running `agent_name`.
    pub(crate) fn insert_active_agent(&mut self, step_id: &str, agent_name: &str) -> bool {
        let previous = self
            .active_steps
            .insert(step_id.to_string(), agent_name.to_string());
        let changed = previous.as_deref() != Some(agent_name);
        if changed {
            self.touch();
        }
        changed
    }

    /// Returns `true` when `step_id` had an active agent.
    pub(crate) fn remove_active_agent(&mut self, step_id: &str) -> bool {
        let removed = self.active_steps.remove(step_id).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    pub(crate) fn set_output(&mut self, key: &str, value: Value) {
        self.output_data.insert(key.to_string(), value);
        self.touch();
    }

    pub(crate) fn set_error(&mut self, key: &str, value: Value) {
        self.error_data.insert(key.to_string(), value);
        self.touch();
    }

    pub(crate) fn clear_failures(&mut self) {
        self.failed_step_ids.clear();
        self.error_data.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
