//! # Workflow Context
//!
//! Shared data for one running workflow: the submitted input, the outputs of
//! completed steps, and scoped key/value entries written by agents.
//!
//! Scopes are checked when an entry is read, not when it is written:
//!
//! - `Global` and `Workflow` entries are visible to every reader
//! - `Agent(name)` entries are visible only to that agent
//! - `Task(step_id)` entries are visible only to that step
//!
//! An agent-scoped entry becomes visible to other agents once it is
//! [`promoted`](WorkflowContext::promote) to workflow scope.
//!
//! The context is guarded by its own lock, separate from the state manager.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Visibility of a context entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "owner", rename_all = "snake_case")]
pub enum ContextScope {
    Global,
    Workflow,
    Agent(String),
    Task(String),
}

impl ContextScope {
    fn is_shared(&self) -> bool {
        matches!(self, Self::Global | Self::Workflow)
    }
}

/// Who is reading. The orchestrator reads with full visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextAccessor {
    pub agent_name: Option<String>,
    pub step_id: Option<String>,
    privileged: bool,
}

impl ContextAccessor {
    pub fn for_step(step_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: Some(agent_name.into()),
            step_id: Some(step_id.into()),
            privileged: false,
        }
    }

    pub fn orchestrator() -> Self {
        Self {
            privileged: true,
            ..Self::default()
        }
    }

    pub fn can_read(&self, scope: &ContextScope) -> bool {
        if self.privileged || scope.is_shared() {
            return true;
        }
        match scope {
            ContextScope::Agent(owner) => self.agent_name.as_deref() == Some(owner.as_str()),
            ContextScope::Task(owner) => self.step_id.as_deref() == Some(owner.as_str()),
            ContextScope::Global | ContextScope::Workflow => true,
        }
    }

    /// Scopes searched by `get`, most specific first
    fn lookup_order(&self) -> Vec<ContextScope> {
        let mut order = Vec::with_capacity(4);
        if let Some(step_id) = &self.step_id {
            order.push(ContextScope::Task(step_id.clone()));
        }
        if let Some(agent_name) = &self.agent_name {
            order.push(ContextScope::Agent(agent_name.clone()));
        }
        order.push(ContextScope::Workflow);
        order.push(ContextScope::Global);
        order
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub value: Value,
    pub scope: ContextScope,
    pub written_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ContextData {
    input: Value,
    step_outputs: Map<String, Value>,
    entries: HashMap<(ContextScope, String), ContextEntry>,
}

#[derive(Debug)]
pub struct WorkflowContext {
    workflow_id: String,
    data: RwLock<ContextData>,
}

impl WorkflowContext {
    pub fn new(workflow_id: impl Into<String>, input: Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            data: RwLock::new(ContextData {
                input,
                ..ContextData::default()
            }),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn input(&self) -> Value {
        self.data.read().input.clone()
    }

    /// Write an entry. Overwrites any entry with the same key in the same scope.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: Value,
        scope: ContextScope,
        written_by: Option<&str>,
    ) {
        let key = key.into();
        let entry = ContextEntry {
            value,
            scope: scope.clone(),
            written_by: written_by.map(str::to_string),
            updated_at: Utc::now(),
        };
        self.data.write().entries.insert((scope, key), entry);
    }

    /// Most specific entry visible to `accessor`. The orchestrator reads
    /// shared scopes first, then the newest private entry under `key`.
    pub fn get(&self, key: &str, accessor: &ContextAccessor) -> Option<Value> {
        let data = self.data.read();
        let scoped = accessor
            .lookup_order()
            .into_iter()
            .find_map(|scope| data.entries.get(&(scope, key.to_string())));
        if scoped.is_some() || !accessor.privileged {
            return scoped.map(|entry| entry.value.clone());
        }

        data.entries
            .iter()
            .filter(|((_, entry_key), _)| entry_key == key)
            .max_by_key(|(_, entry)| entry.updated_at)
            .map(|(_, entry)| entry.value.clone())
    }

    /// Read from an explicit scope, subject to the same access check
    pub fn get_scoped(
        &self,
        key: &str,
        scope: &ContextScope,
        accessor: &ContextAccessor,
    ) -> Option<Value> {
        if !accessor.can_read(scope) {
            return None;
        }
        self.data
            .read()
            .entries
            .get(&(scope.clone(), key.to_string()))
            .map(|entry| entry.value.clone())
    }

    /// Move an entry to workflow scope. Returns `false` when no entry exists
    /// under `key` in `from`.
    pub fn promote(&self, key: &str, from: &ContextScope) -> bool {
        if *from == ContextScope::Workflow {
            return self
                .data
                .read()
                .entries
                .contains_key(&(ContextScope::Workflow, key.to_string()));
        }

        let mut data = self.data.write();
        match data.entries.remove(&(from.clone(), key.to_string())) {
            Some(mut entry) => {
                entry.scope = ContextScope::Workflow;
                entry.updated_at = Utc::now();
                data.entries
                    .insert((ContextScope::Workflow, key.to_string()), entry);
                true
            }
            None => false,
        }
    }

    /// Every entry `accessor` may read, keyed by entry key. More specific
    /// scopes shadow shared ones.
    pub fn visible_entries(&self, accessor: &ContextAccessor) -> Map<String, Value> {
        let data = self.data.read();
        let mut visible = Map::new();
        if accessor.privileged {
            let mut private: Vec<(&String, &ContextEntry)> = data
                .entries
                .iter()
                .filter(|((scope, _), _)| !scope.is_shared())
                .map(|((_, key), entry)| (key, entry))
                .collect();
            private.sort_by_key(|(_, entry)| entry.updated_at);
            for (key, entry) in private {
                visible.insert(key.clone(), entry.value.clone());
            }
        }
        for scope in accessor.lookup_order().into_iter().rev() {
            for ((entry_scope, key), entry) in data.entries.iter() {
                if *entry_scope == scope {
                    visible.insert(key.clone(), entry.value.clone());
                }
            }
        }
        visible
    }

    pub fn step_output(&self, step_id: &str) -> Option<Value> {
        self.data.read().step_outputs.get(step_id).cloned()
    }

    pub fn step_outputs(&self) -> Map<String, Value> {
        self.data.read().step_outputs.clone()
    }

    pub fn set_step_output(&self, step_id: impl Into<String>, output: Value) {
        self.data.write().step_outputs.insert(step_id.into(), output);
    }

    /// Merge a whole batch of step outputs in one critical section
    pub fn merge_step_outputs<I>(&self, outputs: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut data = self.data.write();
        for (step_id, output) in outputs {
            data.step_outputs.insert(step_id, output);
        }
    }

    /// Document that step conditions are evaluated against:
    /// `{ "input": ..., "steps": {...}, "context": {...} }` where `context`
    /// holds only global and workflow scoped entries.
    pub fn condition_view(&self) -> Value {
        let data = self.data.read();
        let mut shared = Map::new();
        for scope in [ContextScope::Global, ContextScope::Workflow] {
            for ((entry_scope, key), entry) in data.entries.iter() {
                if *entry_scope == scope {
                    shared.insert(key.clone(), entry.value.clone());
                }
            }
        }
        json!({
            "input": data.input,
            "steps": data.step_outputs,
            "context": shared,
        })
    }

    /// Same shape as [`condition_view`](Self::condition_view) but with the
    /// entries `accessor` may read. Handed to agents with each invocation.
    pub fn snapshot_for(&self, accessor: &ContextAccessor) -> Value {
        let visible = self.visible_entries(accessor);
        let data = self.data.read();
        json!({
            "input": data.input,
            "steps": data.step_outputs,
            "context": visible,
        })
    }
}
