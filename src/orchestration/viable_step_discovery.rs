//! # Viable Step Discovery
//!
//! Decides which steps of a definition can run next, given what has already
//! completed or been skipped.
//!
//! Two readings of the dependency graph are supported:
//!
//! - **In order** (sequential and pipeline): a step is examined once, at its
//!   position in the declaration. Dependencies not completed by then cause
//!   a skip.
//! - **Ready set** (parallel): a step waits until its dependencies settle.
//!   When nothing is ready, nothing was skipped and steps remain, the
//!   workflow is deadlocked.
//!
//! In both readings a false condition skips the step, and a step depending
//! on a skipped step is itself skipped.

use crate::orchestration::types::{WorkflowDefinition, WorkflowStep};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    ConditionNotMet,
    DependencySkipped { dependency: String },
    DependencyNotCompleted { dependency: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionNotMet => write!(f, "condition not met"),
            Self::DependencySkipped { dependency } => {
                write!(f, "dependency '{dependency}' was skipped")
            }
            Self::DependencyNotCompleted { dependency } => {
                write!(f, "dependency '{dependency}' has not completed")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReadiness {
    Ready,
    Waiting,
    Skip(SkipReason),
}

/// Steps settled so far in one run
#[derive(Debug, Clone, Default)]
pub struct ExecutionProgress {
    completed: Vec<String>,
    completed_set: HashSet<String>,
    skipped: Vec<String>,
    skipped_set: HashSet<String>,
}

impl ExecutionProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from steps already recorded complete, e.g. after a re-entry
    pub fn from_completed<I, S>(completed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut progress = Self::default();
        for step_id in completed {
            progress.mark_completed(step_id);
        }
        progress
    }

    pub fn mark_completed(&mut self, step_id: impl Into<String>) {
        let step_id = step_id.into();
        if self.completed_set.insert(step_id.clone()) {
            self.completed.push(step_id);
        }
    }

    pub fn mark_skipped(&mut self, step_id: impl Into<String>) {
        let step_id = step_id.into();
        if self.skipped_set.insert(step_id.clone()) {
            self.skipped.push(step_id);
        }
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_set.contains(step_id)
    }

    pub fn is_skipped(&self, step_id: &str) -> bool {
        self.skipped_set.contains(step_id)
    }

    pub fn is_settled(&self, step_id: &str) -> bool {
        self.is_completed(step_id) || self.is_skipped(step_id)
    }

    /// Completed step ids in completion order
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}

/// Result of one ready-set pass
#[derive(Debug, Default)]
pub struct Discovery<'a> {
    pub ready: Vec<&'a WorkflowStep>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl Discovery<'_> {
    pub fn made_progress(&self) -> bool {
        !self.ready.is_empty() || !self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ViableStepDiscovery<'a> {
    definition: &'a WorkflowDefinition,
}

impl<'a> ViableStepDiscovery<'a> {
    pub fn new(definition: &'a WorkflowDefinition) -> Self {
        Self { definition }
    }

    /// Readiness of a step examined at its declaration position
    pub fn readiness_in_order(
        &self,
        step: &WorkflowStep,
        progress: &ExecutionProgress,
        view: &Value,
    ) -> StepReadiness {
        for dependency in &step.dependencies {
            if progress.is_skipped(dependency) {
                return StepReadiness::Skip(SkipReason::DependencySkipped {
                    dependency: dependency.clone(),
                });
            }
            if !progress.is_completed(dependency) {
                return StepReadiness::Skip(SkipReason::DependencyNotCompleted {
                    dependency: dependency.clone(),
                });
            }
        }
        if !step.conditions_hold(view) {
            return StepReadiness::Skip(SkipReason::ConditionNotMet);
        }
        StepReadiness::Ready
    }

    /// Readiness of a step in the ready-set reading
    pub fn readiness(
        &self,
        step: &WorkflowStep,
        progress: &ExecutionProgress,
        view: &Value,
    ) -> StepReadiness {
        if let Some(dependency) = step
            .dependencies
            .iter()
            .find(|dependency| progress.is_skipped(dependency))
        {
            return StepReadiness::Skip(SkipReason::DependencySkipped {
                dependency: dependency.clone(),
            });
        }
        if !step
            .dependencies
            .iter()
            .all(|dependency| progress.is_completed(dependency))
        {
            return StepReadiness::Waiting;
        }
        if !step.conditions_hold(view) {
            return StepReadiness::Skip(SkipReason::ConditionNotMet);
        }
        StepReadiness::Ready
    }

    /// Steps neither completed nor skipped, in declaration order
    pub fn pending(&self, progress: &ExecutionProgress) -> Vec<String> {
        self.definition
            .steps
            .iter()
            .filter(|step| !progress.is_settled(&step.step_id))
            .map(|step| step.step_id.clone())
            .collect()
    }

    /// One ready-set pass. At most `limit` steps are returned as ready; the
    /// rest stay pending for the next pass. Skips are not limited.
    pub fn discover(
        &self,
        progress: &ExecutionProgress,
        view: &Value,
        limit: usize,
    ) -> Discovery<'a> {
        let definition: &'a WorkflowDefinition = self.definition;
        let mut discovery = Discovery::default();
        for step in &definition.steps {
            if progress.is_settled(&step.step_id) {
                continue;
            }
            match self.readiness(step, progress, view) {
                StepReadiness::Ready if discovery.ready.len() < limit => {
                    discovery.ready.push(step)
                }
                StepReadiness::Ready | StepReadiness::Waiting => {}
                StepReadiness::Skip(reason) => {
                    discovery.skipped.push((step.step_id.clone(), reason))
                }
            }
        }
        discovery
    }
}
