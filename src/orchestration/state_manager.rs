//! # Workflow State Manager
//!
//! Owner of every [`WorkflowState`]. All reads hand out snapshots; all
//! mutation goes through the methods here.
//!
//! ## Key Features
//!
//! - **Legal transitions only**: every status change is checked against the
//!   fixed table in [`WorkflowStatus::allowed_transitions`]
//! - **Idempotent step bookkeeping**: re-marking a step is a no-op
//! - **Auto-completion**: the last step completing while Running moves the
//!   workflow to Completed
//! - **Isolated listeners**: a listener that errors or panics is logged and
//!   skipped; the remaining listeners still run
//! - **Persistence hook**: every mutation is written through an optional
//!   [`StateStore`]; [`WorkflowStateManager::rehydrate`] reloads active
//!   workflows on startup
//!
//! ## Locking
//!
//! One manager-wide re-entrant lock guards the read-modify-write of every
//! operation. Listeners run while the lock is still held but after the
//! mutable borrow is released, so a listener may call back into the manager
//! (including another transition) on the same thread.

use crate::error::{AgentflowError, Result};
use crate::events::{EventPublisher, WorkflowEvent};
use crate::logging::log_workflow_operation;
use crate::models::WorkflowState;
use crate::state_machine::{StateStore, StateTransition, WorkflowStatus};
use chrono::Utc;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What happens to failure bookkeeping when a Failed workflow re-enters
/// Running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReentryPolicy {
    /// Keep `failed_step_ids` and `error_data` as they were
    PreserveBookkeeping,
    /// Clear `failed_step_ids` and `error_data`; completed steps are kept
    #[default]
    ClearFailures,
}

/// Callback invoked after every transition of a subscribed workflow
pub type StateListener =
    Arc<dyn Fn(&WorkflowState, &StateTransition) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    /// `None` listens to every workflow
    workflow_id: Option<String>,
    callback: StateListener,
}

#[derive(Default)]
struct ManagerInner {
    states: HashMap<String, WorkflowState>,
    listeners: Vec<ListenerEntry>,
    next_listener_id: u64,
}

pub struct WorkflowStateManager {
    inner: ReentrantMutex<RefCell<ManagerInner>>,
    store: Option<Arc<dyn StateStore>>,
    events: Option<EventPublisher>,
    reentry_policy: RetryReentryPolicy,
}

impl std::fmt::Debug for WorkflowStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStateManager")
            .field("persistent", &self.store.is_some())
            .field("reentry_policy", &self.reentry_policy)
            .finish()
    }
}

impl WorkflowStateManager {
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(ManagerInner::default())),
            store: None,
            events: None,
            reentry_policy: RetryReentryPolicy::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_publisher(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_reentry_policy(mut self, policy: RetryReentryPolicy) -> Self {
        self.reentry_policy = policy;
        self
    }

    pub fn reentry_policy(&self) -> RetryReentryPolicy {
        self.reentry_policy
    }

    /// Create a Pending workflow
    pub fn create(
        &self,
        workflow_id: &str,
        input_data: Map<String, Value>,
        total_steps: usize,
    ) -> Result<WorkflowState> {
        let guard = self.inner.lock();
        let snapshot = {
            let mut inner = guard.borrow_mut();
            if inner.states.contains_key(workflow_id) {
                warn!(workflow_id = %workflow_id, "Refusing to create duplicate workflow");
                return Err(AgentflowError::AlreadyExists(workflow_id.to_string()));
            }
            let state = WorkflowState::new(workflow_id, input_data, total_steps);
            inner.states.insert(workflow_id.to_string(), state.clone());
            state
        };

        self.persist(&snapshot);
        log_workflow_operation(
            "create",
            workflow_id,
            WorkflowStatus::Pending.as_str(),
            Some(&format!("total_steps={total_steps}")),
        );
        Ok(snapshot)
    }

    /// Snapshot of one workflow
    pub fn get(&self, workflow_id: &str) -> Option<WorkflowState> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.states.get(workflow_id).cloned()
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.states.contains_key(workflow_id)
    }

    /// Snapshots of every workflow, optionally filtered by status
    pub fn list(&self, status: Option<WorkflowStatus>) -> Vec<WorkflowState> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let mut states: Vec<WorkflowState> = inner
            .states
            .values()
            .filter(|state| status.map_or(true, |s| state.status() == s))
            .cloned()
            .collect();
        states.sort_by_key(|state| state.created_at());
        states
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a workflow to `new_status`.
    ///
    /// Illegal moves fail with [`AgentflowError::InvalidTransition`] and leave
    /// the stored status untouched.
    pub fn transition(
        &self,
        workflow_id: &str,
        new_status: WorkflowStatus,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> Result<bool> {
        self.transition_with_metadata(workflow_id, new_status, actor, reason, HashMap::new())
    }

    pub fn transition_with_metadata(
        &self,
        workflow_id: &str,
        new_status: WorkflowStatus,
        actor: Option<&str>,
        reason: Option<&str>,
        metadata: HashMap<String, Value>,
    ) -> Result<bool> {
        let guard = self.inner.lock();
        let (snapshot, transition, listeners) = {
            let mut inner = guard.borrow_mut();
            let state = inner
                .states
                .get_mut(workflow_id)
                .ok_or_else(|| AgentflowError::NotFound(workflow_id.to_string()))?;

            let current = state.status();
            if !current.can_transition_to(new_status) {
                warn!(
                    workflow_id = %workflow_id,
                    from = %current,
                    to = %new_status,
                    actor = actor,
                    "Rejected invalid workflow transition"
                );
                return Err(AgentflowError::InvalidTransition {
                    workflow_id: workflow_id.to_string(),
                    from: current,
                    to: new_status,
                });
            }

            if current == WorkflowStatus::Failed
                && new_status == WorkflowStatus::Running
                && self.reentry_policy == RetryReentryPolicy::ClearFailures
            {
                debug!(workflow_id = %workflow_id, "Clearing failure bookkeeping on retry re-entry");
                state.clear_failures();
            }

            let transition = StateTransition::new(
                Some(current),
                new_status,
                actor.map(str::to_string),
                reason.map(str::to_string),
            )
            .with_metadata(metadata);
            state.apply_transition(transition.clone());

            let snapshot = state.clone();
            let listeners = Self::listeners_for(&inner, workflow_id);
            (snapshot, transition, listeners)
        };

        self.persist(&snapshot);
        log_workflow_operation(
            "transition",
            workflow_id,
            new_status.as_str(),
            reason,
        );
        self.publish(WorkflowEvent::StateChanged {
            workflow_id: workflow_id.to_string(),
            transition: transition.clone(),
        });
        self.notify(&listeners, &snapshot, &transition);

        drop(guard);
        Ok(true)
    }

    /// Record a completed step. Returns `false` when it was already complete.
    ///
    /// When this completes the last step of a Running workflow, the workflow
    /// moves to Completed.
    pub fn mark_step_complete(
        &self,
        workflow_id: &str,
        step_id: &str,
        output: Option<Value>,
    ) -> Result<bool> {
        let guard = self.inner.lock();
        let (newly_completed, snapshot) = {
            let mut inner = guard.borrow_mut();
            let state = inner
                .states
                .get_mut(workflow_id)
                .ok_or_else(|| AgentflowError::NotFound(workflow_id.to_string()))?;

            let newly_completed = state.record_step_complete(step_id);
            if newly_completed {
                if let Some(output) = output {
                    state.set_output(step_id, output);
                }
            }
            (newly_completed, state.clone())
        };

        if !newly_completed {
            debug!(workflow_id = %workflow_id, step_id = %step_id, "Step already complete");
            return Ok(false);
        }

        self.persist(&snapshot);
        debug!(
            workflow_id = %workflow_id,
            step_id = %step_id,
            completed_steps = snapshot.completed_steps(),
            total_steps = snapshot.total_steps(),
            "Step marked complete"
        );

        if snapshot.status() == WorkflowStatus::Running
            && snapshot.completed_steps() >= snapshot.total_steps()
        {
            self.transition(
                workflow_id,
                WorkflowStatus::Completed,
                None,
                Some("all steps completed"),
            )?;
        }

        drop(guard);
        Ok(true)
    }

    /// Record a failed step. Returns `false` when it was already failed.
    pub fn mark_step_failed(
        &self,
        workflow_id: &str,
        step_id: &str,
        error: Option<Value>,
    ) -> Result<bool> {
        let snapshot = self.mutate(workflow_id, |state| {
            let newly_failed = state.record_step_failed(step_id);
            if newly_failed {
                if let Some(error) = error {
                    state.set_error(step_id, error);
                }
            }
            newly_failed
        })?;

        if !snapshot.0 {
            debug!(workflow_id = %workflow_id, step_id = %step_id, "Step already failed");
        }
        Ok(snapshot.0)
    }

    /// Record `agent_name` as running `step_id`. An agent shared by several
    /// in-flight steps stays listed until the last of them is unregistered.
    pub fn register_active_agent(
        &self,
        workflow_id: &str,
        step_id: &str,
        agent_name: &str,
    ) -> Result<bool> {
        self.mutate(workflow_id, |state| {
            state.insert_active_agent(step_id, agent_name)
        })
        .map(|(changed, _)| changed)
    }

    pub fn unregister_active_agent(&self, workflow_id: &str, step_id: &str) -> Result<bool> {
        self.mutate(workflow_id, |state| state.remove_active_agent(step_id))
            .map(|(changed, _)| changed)
    }

    pub fn update_output(&self, workflow_id: &str, key: &str, value: Value) -> Result<()> {
        self.mutate(workflow_id, |state| state.set_output(key, value))
            .map(|_| ())
    }

    pub fn set_error_data(&self, workflow_id: &str, key: &str, value: Value) -> Result<()> {
        self.mutate(workflow_id, |state| state.set_error(key, value))
            .map(|_| ())
    }

    /// Register a listener for one workflow
    pub fn subscribe<F>(&self, workflow_id: &str, callback: F) -> ListenerId
    where
        F: Fn(&WorkflowState, &StateTransition) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener_entry(Some(workflow_id.to_string()), Arc::new(callback))
    }

    /// Register a listener for every workflow
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&WorkflowState, &StateTransition) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener_entry(None, Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let before = inner.listeners.len();
        inner.listeners.retain(|entry| entry.id != id);
        inner.listeners.len() != before
    }

    /// Remove one workflow from memory and from the store
    pub fn delete(&self, workflow_id: &str) -> Result<bool> {
        let guard = self.inner.lock();
        let removed = {
            let mut inner = guard.borrow_mut();
            let removed = inner.states.remove(workflow_id).is_some();
            inner
                .listeners
                .retain(|entry| entry.workflow_id.as_deref() != Some(workflow_id));
            removed
        };

        if let Some(store) = &self.store {
            store.delete(workflow_id)?;
        }
        if removed {
            log_workflow_operation("delete", workflow_id, "deleted", None);
        }
        Ok(removed)
    }

    /// Retention sweep: drop finished workflows that finished longer than
    /// `age` ago. Returns the removed ids.
    ///
    /// Failed counts as finished here even though it may still re-enter
    /// Running. A failed workflow that nobody retried within `age` is swept
    /// like a completed or cancelled one; a retried one restamps
    /// `completed_at` when it finishes again.
    pub fn cleanup_terminal_older_than(&self, age: Duration) -> Vec<String> {
        let cutoff = match chrono::Duration::from_std(age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return Vec::new(),
        };

        let guard = self.inner.lock();
        let expired: Vec<String> = {
            let inner = guard.borrow();
            inner
                .states
                .values()
                .filter(|state| state.status().is_finished())
                .filter(|state| state.completed_at().unwrap_or(state.updated_at()) <= cutoff)
                .map(|state| state.workflow_id().to_string())
                .collect()
        };

        let mut removed = Vec::with_capacity(expired.len());
        for workflow_id in expired {
            match self.delete(&workflow_id) {
                Ok(_) => removed.push(workflow_id),
                Err(error) => warn!(
                    workflow_id = %workflow_id,
                    error = %error,
                    "Retention sweep failed to delete workflow"
                ),
            }
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "🧹 Retention sweep removed finished workflows");
        }
        removed
    }

    /// Load non-terminal workflows from the store. Workflows already in
    /// memory are left alone. Returns how many were loaded.
    pub fn rehydrate(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let persisted = store.list_active()?;

        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let mut loaded = 0;
        for state in persisted {
            if !inner.states.contains_key(state.workflow_id()) {
                inner.states.insert(state.workflow_id().to_string(), state);
                loaded += 1;
            }
        }

        info!(loaded, "♻️ Rehydrated workflow state from store");
        Ok(loaded)
    }

    // -- internals --

    /// Apply a bookkeeping mutation that never changes status
    fn mutate<T>(
        &self,
        workflow_id: &str,
        change: impl FnOnce(&mut WorkflowState) -> T,
    ) -> Result<(T, WorkflowState)> {
        let guard = self.inner.lock();
        let (result, snapshot) = {
            let mut inner = guard.borrow_mut();
            let state = inner
                .states
                .get_mut(workflow_id)
                .ok_or_else(|| AgentflowError::NotFound(workflow_id.to_string()))?;
            let result = change(state);
            (result, state.clone())
        };
        self.persist(&snapshot);
        drop(guard);
        Ok((result, snapshot))
    }

    fn add_listener_entry(&self, workflow_id: Option<String>, callback: StateListener) -> ListenerId {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.next_listener_id += 1;
        let id = ListenerId(inner.next_listener_id);
        inner.listeners.push(ListenerEntry {
            id,
            workflow_id,
            callback,
        });
        id
    }

    fn listeners_for(inner: &ManagerInner, workflow_id: &str) -> Vec<(ListenerId, StateListener)> {
        inner
            .listeners
            .iter()
            .filter(|entry| {
                entry
                    .workflow_id
                    .as_deref()
                    .map_or(true, |id| id == workflow_id)
            })
            .map(|entry| (entry.id, Arc::clone(&entry.callback)))
            .collect()
    }

    fn notify(
        &self,
        listeners: &[(ListenerId, StateListener)],
        state: &WorkflowState,
        transition: &StateTransition,
    ) {
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(state, transition))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(
                    workflow_id = %state.workflow_id(),
                    listener_id = id.0,
                    error = %error,
                    "State listener failed"
                ),
                Err(_) => error!(
                    workflow_id = %state.workflow_id(),
                    listener_id = id.0,
                    "State listener panicked"
                ),
            }
        }
    }

    /// In-process state is authoritative; store failures are logged only
    fn persist(&self, state: &WorkflowState) {
        if let Some(store) = &self.store {
            if let Err(error) = store.save(state) {
                warn!(
                    workflow_id = %state.workflow_id(),
                    error = %error,
                    "Failed to persist workflow state"
                );
            }
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl Default for WorkflowStateManager {
    fn default() -> Self {
        Self::new()
    }
}
