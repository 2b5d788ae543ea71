//! # Workflow Orchestrator
//!
//! Top-level coordinator. Takes a [`WorkflowDefinition`] and input data,
//! drives each step through the [`StepExecutor`] according to the chosen
//! [`ExecutionStrategy`], and returns an [`ExecutionResult`].
//!
//! ## Execution Flow
//!
//! 1. Validate the definition and create the Pending state
//! 2. Move to Running and build the shared [`WorkflowContext`]
//! 3. Run steps: in declaration order (sequential, pipeline) or in
//!    dependency-ready batches bounded by `max_parallel_agents` (parallel)
//! 4. A step whose recovery ends without success fails the workflow; when
//!    rollback is enabled the compensation hook records what had completed
//! 5. Otherwise the workflow completes with per-step results
//!
//! Pause, resume and cancel are cooperative: they change workflow status
//! immediately and the run reacts at the next step or batch boundary.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agentflow_core::orchestration::{
//!     InMemoryAgentRegistry, WorkflowDefinition, WorkflowOrchestrator, WorkflowStep,
//! };
//! use agentflow_core::config::AgentflowConfig;
//! use serde_json::{json, Map};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = Arc::new(InMemoryAgentRegistry::new());
//! registry.register_fn("drafter", |invocation| async move {
//!     Ok(json!({ "draft": format!("about {}", invocation.context["input"]["topic"]) }))
//! });
//!
//! let orchestrator =
//!     WorkflowOrchestrator::from_config(registry, &AgentflowConfig::default()).unwrap();
//! let definition = WorkflowDefinition::new("newsletter")
//!     .with_step(WorkflowStep::new("draft", "drafter"));
//!
//! let mut input = Map::new();
//! input.insert("topic".to_string(), json!("rust"));
//! let result = orchestrator.execute(definition, input).await.unwrap();
//! assert!(result.is_success());
//! # });
//! ```

use crate::config::{AgentflowConfig, OrchestratorConfig};
use crate::error::{AgentflowError, Result, StepError};
use crate::events::{EventPublisher, PublishedEvent, WorkflowEvent};
use crate::logging::{log_step_operation, log_workflow_operation};
use crate::models::WorkflowState;
use crate::orchestration::context::{ContextScope, WorkflowContext};
use crate::orchestration::registry::AgentRegistry;
use crate::orchestration::state_manager::WorkflowStateManager;
use crate::orchestration::step_executor::{StepExecutionConfig, StepExecutor, StepOutcome};
use crate::orchestration::types::{
    ExecutionFailure, ExecutionResult, ExecutionStrategy, WorkflowDefinition, WorkflowStep,
};
use crate::orchestration::viable_step_discovery::{
    ExecutionProgress, SkipReason, StepReadiness, ViableStepDiscovery,
};
use crate::resilience::{
    ErrorContext, ErrorRecord, ErrorRecoveryService, ErrorStatistics, RecoveryDecision,
};
use crate::state_machine::{StateStore, WorkflowStatus};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const ACTOR: &str = "orchestrator";

/// Wakes a paused run
#[derive(Debug, Default)]
struct RunControl {
    resume: Notify,
}

struct PreparedRun {
    workflow_id: String,
    definition: WorkflowDefinition,
    input: Map<String, Value>,
    control: Arc<RunControl>,
}

struct StepFailure {
    step_id: Option<String>,
    record: ErrorRecord,
    decision: RecoveryDecision,
}

enum RunFlow {
    Finished,
    Failed(StepFailure),
    Cancelled,
}

enum Checkpoint {
    Continue,
    Stop,
}

struct OrchestratorInner {
    state: Arc<WorkflowStateManager>,
    recovery: Arc<ErrorRecoveryService>,
    executor: StepExecutor,
    config: OrchestratorConfig,
    events: Option<EventPublisher>,
    retention: Duration,
    accepting: AtomicBool,
    controls: DashMap<String, Arc<RunControl>>,
    submissions: DashMap<String, JoinHandle<ExecutionResult>>,
    results: DashMap<String, ExecutionResult>,
}

/// Coordinates workflow execution. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("config", &self.inner.config)
            .field("running", &self.inner.controls.len())
            .finish()
    }
}

impl WorkflowOrchestrator {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        state: Arc<WorkflowStateManager>,
        recovery: Arc<ErrorRecoveryService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::build(
            registry,
            state,
            recovery,
            config,
            None,
            Duration::from_secs(24 * 3600),
        )
    }

    /// Wire every component from one configuration, sharing a single event
    /// publisher between the state manager, recovery service and
    /// orchestrator.
    pub fn from_config(registry: Arc<dyn AgentRegistry>, config: &AgentflowConfig) -> Result<Self> {
        Self::from_config_with_store(registry, config, None)
    }

    /// Like [`from_config`](Self::from_config) with a persistence hook. Active
    /// workflows found in the store are loaded before returning.
    pub fn from_config_with_store(
        registry: Arc<dyn AgentRegistry>,
        config: &AgentflowConfig,
        store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventPublisher::new(config.events.channel_capacity);
        let mut state = WorkflowStateManager::new()
            .with_reentry_policy(config.state.retry_reentry_policy)
            .with_event_publisher(events.clone());
        if let Some(store) = store {
            state = state.with_store(store);
        }
        let state = Arc::new(state);
        let rehydrated = state.rehydrate()?;
        if rehydrated > 0 {
            info!(rehydrated, "Loaded active workflows from state store");
        }

        let recovery =
            Arc::new(ErrorRecoveryService::from_config(config).with_event_publisher(events.clone()));

        Ok(Self::build(
            registry,
            state,
            recovery,
            config.orchestrator.clone(),
            Some(events),
            config.state.retention(),
        ))
    }

    fn build(
        registry: Arc<dyn AgentRegistry>,
        state: Arc<WorkflowStateManager>,
        recovery: Arc<ErrorRecoveryService>,
        config: OrchestratorConfig,
        events: Option<EventPublisher>,
        retention: Duration,
    ) -> Self {
        let executor = StepExecutor::new(
            registry,
            recovery.clone(),
            state.clone(),
            StepExecutionConfig::from(&config),
        );

        info!(
            max_parallel_agents = config.max_parallel_agents,
            default_strategy = %config.default_strategy,
            enable_rollback = config.enable_rollback,
            "🚀 Workflow orchestrator initialized"
        );

        Self {
            inner: Arc::new(OrchestratorInner {
                state,
                recovery,
                executor,
                config,
                events,
                retention,
                accepting: AtomicBool::new(true),
                controls: DashMap::new(),
                submissions: DashMap::new(),
                results: DashMap::new(),
            }),
        }
    }

    pub fn state_manager(&self) -> &Arc<WorkflowStateManager> {
        &self.inner.state
    }

    pub fn recovery_service(&self) -> &Arc<ErrorRecoveryService> {
        &self.inner.recovery
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// `None` when constructed without an event publisher
    pub fn subscribe_events(&self) -> Option<broadcast::Receiver<PublishedEvent>> {
        self.inner.events.as_ref().map(EventPublisher::subscribe)
    }

    /// Run a workflow to completion.
    ///
    /// Only a definition that fails validation, or a workflow id already in
    /// use, is returned as `Err`; both are rejected before any state exists.
    /// Every failure after that is reported inside the [`ExecutionResult`].
    #[instrument(skip(self, definition, input_data), fields(workflow = %definition.name))]
    pub async fn execute(
        &self,
        definition: WorkflowDefinition,
        input_data: Map<String, Value>,
    ) -> Result<ExecutionResult> {
        let run = self.inner.prepare(definition, input_data)?;
        Ok(self.inner.run(run).await)
    }

    /// Start a workflow in the background and return its id. The Pending
    /// state exists before this returns.
    #[instrument(skip(self, definition, input_data), fields(workflow = %definition.name))]
    pub fn submit(
        &self,
        definition: WorkflowDefinition,
        input_data: Map<String, Value>,
    ) -> Result<String> {
        if !self.inner.accepting.load(Ordering::Acquire) {
            return Err(AgentflowError::Internal(
                "orchestrator is shutting down".to_string(),
            ));
        }

        let run = self.inner.prepare(definition, input_data)?;
        let workflow_id = run.workflow_id.clone();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run(run).await });
        self.inner.submissions.insert(workflow_id.clone(), handle);

        log_workflow_operation("submit", &workflow_id, "submitted", None);
        Ok(workflow_id)
    }

    pub fn get_status(&self, workflow_id: &str) -> Option<WorkflowState> {
        self.inner.state.get(workflow_id)
    }

    /// Result of a finished workflow, `None` while it is still running
    pub fn get_result(&self, workflow_id: &str) -> Option<ExecutionResult> {
        let result = self
            .inner
            .results
            .get(workflow_id)
            .map(|entry| entry.value().clone())?;
        self.inner
            .submissions
            .remove_if(workflow_id, |_, handle| handle.is_finished());
        Some(result)
    }

    /// Wait for a submitted workflow to finish
    pub async fn wait_for_result(&self, workflow_id: &str) -> Option<ExecutionResult> {
        if let Some((_, handle)) = self.inner.submissions.remove(workflow_id) {
            match handle.await {
                Ok(result) => return Some(result),
                Err(join_error) => {
                    error!(workflow_id = %workflow_id, error = %join_error, "Workflow task did not finish");
                }
            }
        }
        self.get_result(workflow_id)
    }

    #[instrument(skip(self))]
    pub fn pause(&self, workflow_id: &str) -> bool {
        self.inner
            .request_transition(workflow_id, WorkflowStatus::Paused, "pause requested")
    }

    #[instrument(skip(self))]
    pub fn resume(&self, workflow_id: &str) -> bool {
        let resumed =
            self.inner
                .request_transition(workflow_id, WorkflowStatus::Running, "resume requested");
        if resumed {
            self.inner.wake(workflow_id);
        }
        resumed
    }

    #[instrument(skip(self))]
    pub fn cancel(&self, workflow_id: &str) -> bool {
        let cancelled =
            self.inner
                .request_transition(workflow_id, WorkflowStatus::Cancelled, "cancel requested");
        if cancelled {
            self.inner.wake(workflow_id);
        }
        cancelled
    }

    pub fn get_error_statistics(&self) -> ErrorStatistics {
        self.inner.recovery.get_error_statistics()
    }

    /// Drop finished workflows older than the configured retention
    pub fn run_retention_sweep(&self) -> Vec<String> {
        let removed = self
            .inner
            .state
            .cleanup_terminal_older_than(self.inner.retention);
        for workflow_id in &removed {
            self.inner.results.remove(workflow_id);
        }
        removed
    }

    /// Stop accepting submissions, cancel every submitted workflow that is
    /// still running and wait for them to wind down. Returns how many were
    /// cancelled.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        self.inner.accepting.store(false, Ordering::Release);

        let workflow_ids: Vec<String> = self
            .inner
            .submissions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let cancelled = workflow_ids
            .iter()
            .filter(|workflow_id| {
                self.get_status(workflow_id)
                    .map_or(false, |state| !state.status().is_finished())
                    && self.cancel(workflow_id)
            })
            .count();

        for workflow_id in &workflow_ids {
            if let Some((_, handle)) = self.inner.submissions.remove(workflow_id) {
                if let Err(join_error) = handle.await {
                    error!(workflow_id = %workflow_id, error = %join_error, "Workflow task did not finish");
                }
            }
        }

        info!(
            cancelled,
            drained = workflow_ids.len(),
            "🛑 Workflow orchestrator shut down"
        );
        cancelled
    }
}

impl OrchestratorInner {
    fn prepare(
        &self,
        definition: WorkflowDefinition,
        input: Map<String, Value>,
    ) -> Result<PreparedRun> {
        definition.validate()?;

        let workflow_id = definition
            .workflow_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.state
            .create(&workflow_id, input.clone(), definition.steps.len())?;

        let control = Arc::new(RunControl::default());
        self.controls.insert(workflow_id.clone(), control.clone());

        Ok(PreparedRun {
            workflow_id,
            definition,
            input,
            control,
        })
    }

    async fn run(&self, run: PreparedRun) -> ExecutionResult {
        let started = Instant::now();
        let workflow_id = run.workflow_id.clone();
        let strategy = run
            .definition
            .strategy
            .unwrap_or(self.config.default_strategy);

        log_workflow_operation(
            "execute",
            &workflow_id,
            "started",
            Some(&format!(
                "name={} strategy={} steps={}",
                run.definition.name,
                strategy,
                run.definition.steps.len()
            )),
        );

        let context = Arc::new(WorkflowContext::new(
            &workflow_id,
            Value::Object(run.input.clone()),
        ));
        let mut progress = ExecutionProgress::new();

        let flow = match self.state.transition(
            &workflow_id,
            WorkflowStatus::Running,
            Some(ACTOR),
            Some("execution started"),
        ) {
            Ok(_) => match strategy {
                ExecutionStrategy::Sequential => {
                    self.run_in_order(&run, &context, &mut progress, false)
                        .await
                }
                ExecutionStrategy::Pipeline => {
                    self.run_in_order(&run, &context, &mut progress, true)
                        .await
                }
                ExecutionStrategy::Parallel => {
                    self.run_parallel(&run, &context, &mut progress).await
                }
            },
            Err(error) => {
                warn!(workflow_id = %workflow_id, error = %error, "Workflow could not start");
                RunFlow::Cancelled
            }
        };

        let result = self.finish(&run, &context, &progress, flow, started).await;

        self.controls.remove(&workflow_id);
        self.results.insert(workflow_id.clone(), result.clone());
        log_workflow_operation(
            "execute",
            &workflow_id,
            match &result {
                ExecutionResult::Success { .. } => "completed",
                ExecutionResult::Error { .. } => "failed",
                ExecutionResult::Cancelled { .. } => "cancelled",
            },
            Some(&format!("duration_ms={}", result.duration().as_millis())),
        );
        result
    }

    async fn run_in_order(
        &self,
        run: &PreparedRun,
        context: &Arc<WorkflowContext>,
        progress: &mut ExecutionProgress,
        pipeline: bool,
    ) -> RunFlow {
        let discovery = ViableStepDiscovery::new(&run.definition);
        let mut previous_output = context.input();

        for step in &run.definition.steps {
            if let Checkpoint::Stop = self.checkpoint(run).await {
                return RunFlow::Cancelled;
            }

            let view = context.condition_view();
            if let StepReadiness::Skip(reason) =
                discovery.readiness_in_order(step, progress, &view)
            {
                self.skip_step(&run.workflow_id, &step.step_id, &reason, progress);
                continue;
            }

            let payload = if pipeline {
                pipeline_payload(&step.input_payload, &previous_output)
            } else {
                step.input_payload.clone()
            };

            let outcome = self
                .executor
                .execute(step, payload, context.clone())
                .await;
            if let StepOutcome::Completed { output, .. } = &outcome {
                context.set_step_output(step.step_id.clone(), output.clone());
            }
            match self.apply_outcome(&run.workflow_id, step, outcome, progress) {
                Ok(output) => previous_output = output,
                Err(flow) => return flow,
            }
        }

        RunFlow::Finished
    }

    async fn run_parallel(
        &self,
        run: &PreparedRun,
        context: &Arc<WorkflowContext>,
        progress: &mut ExecutionProgress,
    ) -> RunFlow {
        let discovery = ViableStepDiscovery::new(&run.definition);
        let limit = run
            .definition
            .max_parallel_agents
            .unwrap_or(self.config.max_parallel_agents)
            .max(1);

        loop {
            if let Checkpoint::Stop = self.checkpoint(run).await {
                return RunFlow::Cancelled;
            }

            let view = context.condition_view();
            let pass = discovery.discover(progress, &view, limit);
            let skipped_any = !pass.skipped.is_empty();
            for (step_id, reason) in &pass.skipped {
                self.skip_step(&run.workflow_id, step_id, reason, progress);
            }

            if pass.ready.is_empty() {
                let pending = discovery.pending(progress);
                if pending.is_empty() {
                    return RunFlow::Finished;
                }
                if skipped_any {
                    continue;
                }
                return self.deadlock(&run.workflow_id, pending);
            }

            debug!(
                workflow_id = %run.workflow_id,
                batch = ?pass.ready.iter().map(|step| step.step_id.as_str()).collect::<Vec<_>>(),
                "Dispatching parallel batch"
            );

            let handles: Vec<(&WorkflowStep, JoinHandle<StepOutcome>)> = pass
                .ready
                .iter()
                .map(|step| {
                    let executor = self.executor.clone();
                    let owned = (*step).clone();
                    let payload = step.input_payload.clone();
                    let context = context.clone();
                    let handle =
                        tokio::spawn(async move { executor.execute(&owned, payload, context).await });
                    (*step, handle)
                })
                .collect();

            let (steps, handles): (Vec<&WorkflowStep>, Vec<_>) = handles.into_iter().unzip();
            let joined = join_all(handles).await;
            let outcomes: Vec<(&WorkflowStep, StepOutcome)> = steps
                .into_iter()
                .zip(joined)
                .map(|(step, joined)| match joined {
                    Ok(outcome) => (step, outcome),
                    Err(join_error) => (step, self.lost_step(&run.workflow_id, step, join_error)),
                })
                .collect();

            context.merge_step_outputs(outcomes.iter().filter_map(|(step, outcome)| {
                match outcome {
                    StepOutcome::Completed { output, .. } => {
                        Some((step.step_id.clone(), output.clone()))
                    }
                    _ => None,
                }
            }));

            let mut first_stop = None;
            for (step, outcome) in outcomes {
                if let Err(flow) = self.apply_outcome(&run.workflow_id, step, outcome, progress) {
                    first_stop.get_or_insert(flow);
                }
            }
            if let Some(flow) = first_stop {
                return flow;
            }
        }
    }

    /// Bookkeeping for a finished step. `Err` carries the flow that ends the
    /// run.
    fn apply_outcome(
        &self,
        workflow_id: &str,
        step: &WorkflowStep,
        outcome: StepOutcome,
        progress: &mut ExecutionProgress,
    ) -> std::result::Result<Value, RunFlow> {
        match outcome {
            StepOutcome::Completed {
                output,
                agent_name,
                attempts,
            } => {
                if let Err(error) =
                    self.state
                        .mark_step_complete(workflow_id, &step.step_id, Some(output.clone()))
                {
                    warn!(workflow_id = %workflow_id, step_id = %step.step_id, error = %error, "Could not mark step complete");
                }
                progress.mark_completed(step.step_id.clone());
                self.publish(WorkflowEvent::StepCompleted {
                    workflow_id: workflow_id.to_string(),
                    step_id: step.step_id.clone(),
                    agent_name,
                    attempts,
                });
                Ok(output)
            }
            StepOutcome::Failed {
                record, decision, ..
            } => {
                let error = json!({
                    "error_id": record.error_id,
                    "error_type": record.error_type,
                    "message": record.message,
                    "recovery_action": decision.action,
                });
                if let Err(state_error) =
                    self.state
                        .mark_step_failed(workflow_id, &step.step_id, Some(error.clone()))
                {
                    warn!(workflow_id = %workflow_id, step_id = %step.step_id, error = %state_error, "Could not mark step failed");
                }
                self.publish(WorkflowEvent::StepFailed {
                    workflow_id: workflow_id.to_string(),
                    step_id: step.step_id.clone(),
                    agent_name: record
                        .agent_name
                        .clone()
                        .unwrap_or_else(|| step.agent_name.clone()),
                    error,
                });
                Err(RunFlow::Failed(StepFailure {
                    step_id: Some(step.step_id.clone()),
                    record,
                    decision,
                }))
            }
            StepOutcome::Abandoned { .. } => Err(RunFlow::Cancelled),
        }
    }

    fn skip_step(
        &self,
        workflow_id: &str,
        step_id: &str,
        reason: &SkipReason,
        progress: &mut ExecutionProgress,
    ) {
        progress.mark_skipped(step_id);
        log_step_operation(
            "skip",
            workflow_id,
            step_id,
            None,
            "skipped",
            Some(&reason.to_string()),
        );
        self.publish(WorkflowEvent::StepSkipped {
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// No step can ever become ready. Routed through recovery like any
    /// other failure so it is logged and dead-lettered.
    fn deadlock(&self, workflow_id: &str, pending: Vec<String>) -> RunFlow {
        error!(workflow_id = %workflow_id, pending = ?pending, "🔒 Workflow deadlocked");
        let error = StepError::Deadlock {
            pending: pending.clone(),
        };
        let context = ErrorContext::new()
            .with_phase("dependency_resolution")
            .with_metadata("pending_steps", json!(pending));
        let record = self.recovery.record(workflow_id, &error, &context);
        let decision = self.recovery.recover(&record);
        RunFlow::Failed(StepFailure {
            step_id: None,
            record,
            decision,
        })
    }

    /// A step task that panicked or was aborted
    fn lost_step(
        &self,
        workflow_id: &str,
        step: &WorkflowStep,
        join_error: tokio::task::JoinError,
    ) -> StepOutcome {
        error!(workflow_id = %workflow_id, step_id = %step.step_id, error = %join_error, "Step task did not finish");
        let error = StepError::AgentFailure {
            agent: step.agent_name.clone(),
            message: format!("step task did not finish: {join_error}"),
        };
        let context = ErrorContext::for_step(&step.step_id, &step.agent_name)
            .with_phase("step_dispatch");
        let record = self.recovery.record(workflow_id, &error, &context);
        let decision = self.recovery.recover(&record);
        StepOutcome::Failed {
            record,
            decision,
            attempts: 0,
        }
    }

    /// Wait out a pause; report whether the run may continue
    async fn checkpoint(&self, run: &PreparedRun) -> Checkpoint {
        loop {
            let resumed = run.control.resume.notified();
            match self.state.get(&run.workflow_id).map(|state| state.status()) {
                Some(WorkflowStatus::Running) | Some(WorkflowStatus::Completed) => {
                    return Checkpoint::Continue
                }
                Some(WorkflowStatus::Paused) => {
                    debug!(workflow_id = %run.workflow_id, "⏸️ Workflow paused, waiting for resume");
                    resumed.await;
                }
                _ => return Checkpoint::Stop,
            }
        }
    }

    async fn finish(
        &self,
        run: &PreparedRun,
        context: &WorkflowContext,
        progress: &ExecutionProgress,
        flow: RunFlow,
        started: Instant,
    ) -> ExecutionResult {
        let workflow_id = run.workflow_id.clone();

        let flow = match flow {
            RunFlow::Cancelled => RunFlow::Cancelled,
            other => match self.checkpoint(run).await {
                Checkpoint::Continue => other,
                Checkpoint::Stop => RunFlow::Cancelled,
            },
        };

        match flow {
            RunFlow::Finished => {
                let status = self.state.get(&workflow_id).map(|state| state.status());
                if status == Some(WorkflowStatus::Running) {
                    if let Err(error) = self.state.transition(
                        &workflow_id,
                        WorkflowStatus::Completed,
                        Some(ACTOR),
                        Some("all runnable steps finished"),
                    ) {
                        warn!(workflow_id = %workflow_id, error = %error, "Could not complete workflow");
                    }
                }
                ExecutionResult::Success {
                    workflow_id,
                    step_results: context.step_outputs().into_iter().collect::<HashMap<_, _>>(),
                    skipped_steps: progress.skipped().to_vec(),
                    duration: started.elapsed(),
                }
            }
            RunFlow::Failed(failure) => {
                let failure_data = json!({
                    "error_id": failure.record.error_id,
                    "error_type": failure.record.error_type,
                    "message": failure.record.message,
                    "step_id": failure.step_id,
                    "recovery_action": failure.decision.action,
                });
                if let Err(error) = self.state.set_error_data(&workflow_id, "failure", failure_data)
                {
                    warn!(workflow_id = %workflow_id, error = %error, "Could not record failure data");
                }
                if self.config.enable_rollback {
                    self.compensate(&workflow_id, context, progress, &failure);
                }

                let mut metadata = HashMap::new();
                metadata.insert("error_id".to_string(), json!(failure.record.error_id));
                metadata.insert("error_type".to_string(), json!(failure.record.error_type));
                metadata.insert(
                    "recovery_action".to_string(),
                    json!(failure.decision.action),
                );
                if let Err(error) = self.state.transition_with_metadata(
                    &workflow_id,
                    WorkflowStatus::Failed,
                    Some(ACTOR),
                    Some(&failure.record.message),
                    metadata,
                ) {
                    warn!(workflow_id = %workflow_id, error = %error, "Could not fail workflow");
                }

                ExecutionResult::Error {
                    workflow_id,
                    error: ExecutionFailure {
                        error_id: failure.record.error_id,
                        error_type: failure.record.error_type,
                        message: failure.record.message,
                        step_id: failure.step_id,
                        recovery_action: failure.decision.action,
                    },
                    completed_steps: progress.completed().to_vec(),
                    duration: started.elapsed(),
                }
            }
            RunFlow::Cancelled => ExecutionResult::Cancelled {
                workflow_id,
                completed_steps: progress.completed().to_vec(),
                duration: started.elapsed(),
            },
        }
    }

    /// Compensation hook. Records how far the workflow got; undoing domain
    /// side effects is left to the agents' owners, who can read `rollback`
    /// from the context or from `error_data`.
    fn compensate(
        &self,
        workflow_id: &str,
        context: &WorkflowContext,
        progress: &ExecutionProgress,
        failure: &StepFailure,
    ) {
        let rollback = json!({
            "failed_step": failure.step_id,
            "completed_steps": progress.completed(),
            "reason": failure.record.message,
            "error_id": failure.record.error_id,
            "recovery_action": failure.decision.action,
            "rolled_back_at": Utc::now().to_rfc3339(),
        });

        context.set("rollback", rollback.clone(), ContextScope::Workflow, Some(ACTOR));
        if let Err(error) = self.state.set_error_data(workflow_id, "rollback", rollback) {
            warn!(workflow_id = %workflow_id, error = %error, "Could not record rollback metadata");
        }

        log_workflow_operation(
            "rollback",
            workflow_id,
            "compensated",
            Some(&format!("completed_steps={}", progress.completed().len())),
        );
    }

    fn request_transition(&self, workflow_id: &str, target: WorkflowStatus, reason: &str) -> bool {
        match self
            .state
            .transition(workflow_id, target, Some("api"), Some(reason))
        {
            Ok(changed) => changed,
            Err(error) => {
                debug!(workflow_id = %workflow_id, target = %target, error = %error, "Transition request rejected");
                false
            }
        }
    }

    fn wake(&self, workflow_id: &str) {
        if let Some(control) = self.controls.get(workflow_id) {
            control.resume.notify_one();
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// Input for a pipeline step: its own payload merged over the previous
/// step's output. Non-object values are wrapped.
fn pipeline_payload(own: &Value, previous: &Value) -> Value {
    match (own, previous) {
        (Value::Null, previous) => previous.clone(),
        (Value::Object(own), Value::Object(previous)) => {
            let mut merged = previous.clone();
            for (key, value) in own {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (Value::Object(own), previous) => {
            let mut merged = own.clone();
            merged.insert("previous".to_string(), previous.clone());
            Value::Object(merged)
        }
        (own, previous) => json!({ "input": own, "previous": previous }),
    }
}
