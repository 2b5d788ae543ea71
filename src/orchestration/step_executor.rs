//! # Step Executor
//!
//! Runs one workflow step to a final outcome.
//!
//! ## Execution Phases
//!
//! 1. **Local attempts**: up to `1 + max_retries` agent calls, each bounded
//!    by the step timeout and, when enabled, routed through the agent's
//!    circuit breaker (`agent:<name>`). Failures between attempts are silent
//!    apart from debug logs and use a jitter-free backoff. An open breaker
//!    ends the attempts, but the step still reports the agent's own error.
//! 2. **Escalation**: once local attempts are exhausted the failure is
//!    recorded with the [`ErrorRecoveryService`] and its decision applied:
//!    retry after a delay, switch to the step's fallback agent once, or give
//!    up with the decision attached to the outcome.
//!
//! The executor never changes workflow status. It does keep the workflow's
//! active-agent set current while an agent is running.

use crate::config::OrchestratorConfig;
use crate::error::StepError;
use crate::logging::log_step_operation;
use crate::orchestration::context::WorkflowContext;
use crate::orchestration::registry::{Agent, AgentInvocation, AgentRegistry};
use crate::orchestration::state_manager::WorkflowStateManager;
use crate::orchestration::types::WorkflowStep;
use crate::resilience::{
    ErrorContext, ErrorRecord, ErrorRecoveryService, RecoveryAction, RecoveryDecision,
    RetryStrategy,
};
use crate::state_machine::WorkflowStatus;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Configuration for step execution
#[derive(Debug, Clone)]
pub struct StepExecutionConfig {
    /// Used when a step declares no timeout
    pub default_timeout: Duration,
    /// Backoff between local attempts
    pub local_retry: RetryStrategy,
    pub protect_with_circuit_breakers: bool,
}

impl From<&OrchestratorConfig> for StepExecutionConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            default_timeout: config.default_step_timeout(),
            local_retry: config.local_retry_strategy(),
            protect_with_circuit_breakers: config.protect_agents_with_circuit_breakers,
        }
    }
}

impl Default for StepExecutionConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Final outcome of one step
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Completed {
        output: Value,
        /// Agent that produced the output; the fallback agent if one was used
        agent_name: String,
        attempts: u32,
    },
    Failed {
        record: ErrorRecord,
        decision: RecoveryDecision,
        attempts: u32,
    },
    /// The workflow was cancelled while a recovery retry was pending
    Abandoned { attempts: u32 },
}

impl StepOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::Abandoned { attempts } => *attempts,
        }
    }
}

/// Why a run of attempts ended without output
#[derive(Debug)]
struct AttemptFailure {
    /// Last error the agent itself returned, if it ran at all
    agent_error: Option<StepError>,
    /// Breaker that cut the attempts short
    rejected_by: Option<String>,
}

#[derive(Clone)]
pub struct StepExecutor {
    registry: Arc<dyn AgentRegistry>,
    recovery: Arc<ErrorRecoveryService>,
    state: Arc<WorkflowStateManager>,
    config: StepExecutionConfig,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("config", &self.config)
            .finish()
    }
}

impl StepExecutor {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        recovery: Arc<ErrorRecoveryService>,
        state: Arc<WorkflowStateManager>,
        config: StepExecutionConfig,
    ) -> Self {
        Self {
            registry,
            recovery,
            state,
            config,
        }
    }

    pub fn config(&self) -> &StepExecutionConfig {
        &self.config
    }

    /// Run a step through local attempts and recovery decisions
    #[instrument(skip(self, step, payload, context), fields(workflow_id = %context.workflow_id(), step_id = %step.step_id))]
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        payload: Value,
        context: Arc<WorkflowContext>,
    ) -> StepOutcome {
        let workflow_id = context.workflow_id().to_string();
        let mut agent_name = step.agent_name.clone();
        let mut fallback_used = false;
        let mut retry_count = 0u32;
        let mut attempts = 0u32;
        let mut last_agent_error: Option<StepError> = None;

        log_step_operation(
            "execute",
            &workflow_id,
            &step.step_id,
            Some(&agent_name),
            "started",
            None,
        );

        let mut result = self
            .run_attempts(step, &agent_name, &payload, &context, 1 + step.max_retries, &mut attempts)
            .await;

        loop {
            let failure = match result {
                Ok(output) => {
                    log_step_operation(
                        "execute",
                        &workflow_id,
                        &step.step_id,
                        Some(&agent_name),
                        "completed",
                        Some(&format!("attempts={attempts}")),
                    );
                    return StepOutcome::Completed {
                        output,
                        agent_name,
                        attempts,
                    };
                }
                Err(failure) => failure,
            };

            // Classify what the agent returned, not the breaker rejection.
            // `CircuitOpen` stands only when the agent never ran for this step.
            if failure.agent_error.is_some() {
                last_agent_error = failure.agent_error;
            }
            let error = match (&last_agent_error, &failure.rejected_by) {
                (Some(error), _) => error.clone(),
                (None, Some(dependency)) => StepError::CircuitOpen {
                    dependency: dependency.clone(),
                },
                (None, None) => StepError::failed("no attempts were made"),
            };

            let mut error_context = ErrorContext::for_step(&step.step_id, &agent_name)
                .with_phase("step_execution")
                .with_retry_count(retry_count)
                .with_metadata("attempts", json!(attempts));
            if let Some(dependency) = &failure.rejected_by {
                error_context = error_context.with_metadata("circuit_rejected", json!(dependency));
            }
            let record = self
                .recovery
                .record(&workflow_id, &error, &error_context);
            let decision = self.recovery.recover(&record);

            match decision.action {
                RecoveryAction::Retry => {
                    let delay = decision.retry_after.unwrap_or_default();
                    debug!(
                        workflow_id = %workflow_id,
                        step_id = %step.step_id,
                        retry_count = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying step after recovery delay"
                    );
                    tokio::time::sleep(delay).await;
                    if self.is_cancelled(&workflow_id) {
                        return StepOutcome::Abandoned { attempts };
                    }
                    retry_count += 1;
                    result = self
                        .run_attempts(step, &agent_name, &payload, &context, 1, &mut attempts)
                        .await;
                }
                RecoveryAction::Fallback if !fallback_used && step.fallback_agent.is_some() => {
                    fallback_used = true;
                    agent_name = step.fallback_agent.clone().unwrap_or_default();
                    log_step_operation(
                        "fallback",
                        &workflow_id,
                        &step.step_id,
                        Some(&agent_name),
                        "started",
                        Some(&format!("error_id={}", record.error_id)),
                    );
                    result = self
                        .run_attempts(
                            step,
                            &agent_name,
                            &payload,
                            &context,
                            1 + step.max_retries,
                            &mut attempts,
                        )
                        .await;
                }
                _ => {
                    log_step_operation(
                        "execute",
                        &workflow_id,
                        &step.step_id,
                        Some(&agent_name),
                        "failed",
                        Some(&format!(
                            "error_id={} action={}",
                            record.error_id, decision.action
                        )),
                    );
                    return StepOutcome::Failed {
                        record,
                        decision,
                        attempts,
                    };
                }
            }
        }
    }

    /// Up to `max_attempts` calls to one agent. The agent is listed as active
    /// on the workflow for the duration.
    ///
    /// An open breaker ends the attempts early.
    async fn run_attempts(
        &self,
        step: &WorkflowStep,
        agent_name: &str,
        payload: &Value,
        context: &Arc<WorkflowContext>,
        max_attempts: u32,
        attempts: &mut u32,
    ) -> Result<Value, AttemptFailure> {
        let Some(agent) = self.registry.resolve(agent_name) else {
            *attempts += 1;
            return Err(AttemptFailure {
                agent_error: Some(StepError::Configuration {
                    message: format!("agent '{agent_name}' is not registered"),
                }),
                rejected_by: None,
            });
        };

        let workflow_id = context.workflow_id();
        if let Err(error) = self
            .state
            .register_active_agent(workflow_id, &step.step_id, agent_name)
        {
            warn!(workflow_id = %workflow_id, agent = %agent_name, error = %error, "Could not register active agent");
        }

        let step_timeout = step.timeout.unwrap_or(self.config.default_timeout);
        let mut agent_error: Option<StepError> = None;
        let mut rejected_by: Option<String> = None;
        for attempt in 1..=max_attempts.max(1) {
            *attempts += 1;
            let invocation = AgentInvocation::new(
                &step.step_id,
                agent_name,
                attempt,
                payload.clone(),
                context.clone(),
            );

            match self
                .invoke(agent.clone(), agent_name, invocation, step_timeout)
                .await
            {
                Ok(output) => {
                    self.release_agent(workflow_id, &step.step_id);
                    return Ok(output);
                }
                Err(StepError::CircuitOpen { dependency }) => {
                    debug!(
                        workflow_id = %workflow_id,
                        step_id = %step.step_id,
                        agent = %agent_name,
                        attempt = attempt,
                        dependency = %dependency,
                        "Step attempt rejected by open circuit"
                    );
                    rejected_by = Some(dependency);
                    break;
                }
                Err(error) => {
                    debug!(
                        workflow_id = %workflow_id,
                        step_id = %step.step_id,
                        agent = %agent_name,
                        attempt = attempt,
                        error = %error,
                        "Step attempt failed"
                    );
                    agent_error = Some(error);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.local_retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        self.release_agent(workflow_id, &step.step_id);
        let failure = AttemptFailure {
            agent_error,
            rejected_by,
        };
        Err(failure)
    }

    async fn invoke(
        &self,
        agent: Arc<dyn Agent>,
        agent_name: &str,
        invocation: AgentInvocation,
        step_timeout: Duration,
    ) -> Result<Value, StepError> {
        let call = move || async move {
            match timeout(step_timeout, agent.invoke(invocation)).await {
                Ok(result) => result,
                Err(_) => Err(StepError::Timeout {
                    timeout: step_timeout,
                }),
            }
        };

        if self.config.protect_with_circuit_breakers {
            self.recovery
                .call_protected(&format!("agent:{agent_name}"), call)
                .await
        } else {
            call().await
        }
    }

    fn release_agent(&self, workflow_id: &str, step_id: &str) {
        if let Err(error) = self.state.unregister_active_agent(workflow_id, step_id) {
            warn!(workflow_id = %workflow_id, step_id = %step_id, error = %error, "Could not unregister active agent");
        }
    }

    fn is_cancelled(&self, workflow_id: &str) -> bool {
        self.state
            .get(workflow_id)
            .map_or(true, |state| state.status() == WorkflowStatus::Cancelled)
    }
}
