//! Confirmation-gated procedure execution.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog, ExecutionRecord, StepOutcome, StepState};
use crate::catalog::{Procedure, Step};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::exec::locks::TargetLocks;
use crate::exec::state::ExecutionState;
use crate::runner::{CommandRunner, CommandSpec};
use crate::target::Target;
use crate::template;

/// Rendered dry-run view of a step, shown to the operator before anything
/// executes.
#[derive(Debug, Clone)]
pub struct StepPreview {
    pub step: String,
    pub rendered_command: String,
    pub predicted_effect: String,
    pub expects: String,
    pub destructive: bool,
    pub idempotent: bool,
}

/// Operator approval seam. The CLI backs this with an interactive prompt;
/// tests script it.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Approve or deny one step. Called for every step that is not safe to
    /// auto-run; destructive steps always pass through here.
    async fn confirm_step(&self, preview: &StepPreview) -> bool;

    /// Approve or deny running the rollback procedure after a failure.
    async fn confirm_rollback(&self, procedure: &Procedure) -> bool;
}

/// Everything needed to run one procedure against one target.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub procedure: Procedure,
    /// Rollback procedure resolved from the catalog, when the procedure
    /// names one.
    pub rollback: Option<Procedure>,
    pub target: Target,
    pub params: BTreeMap<String, String>,
    pub operator: String,
}

/// Why a run stopped short of success.
#[derive(Debug, Clone)]
enum StepFailure {
    Denied {
        step: String,
    },
    Execution {
        step: String,
        expected: String,
        observed: String,
    },
}

impl StepFailure {
    fn step(&self) -> &str {
        match self {
            Self::Denied { step } | Self::Execution { step, .. } => step,
        }
    }

    fn into_error(self) -> Error {
        match self {
            Self::Denied { step } => Error::ConfirmationRequired { step },
            Self::Execution {
                step,
                expected,
                observed,
            } => Error::StepExecution {
                step,
                expected,
                observed,
            },
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Denied { step } => format!("confirmation denied for '{step}'"),
            Self::Execution {
                step,
                expected,
                observed,
            } => format!("'{step}' expected {expected}, observed {observed}"),
        }
    }
}

/// Executes procedures: dry-run first, confirmation-gated, audited, with
/// per-target serialization and bounded retries for repeat-safe steps.
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    gate: Arc<dyn ConfirmationGate>,
    audit: StdMutex<AuditLog>,
    locks: TargetLocks,
    config: EngineConfig,
}

impl Executor {
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        gate: Arc<dyn ConfirmationGate>,
        audit: AuditLog,
        config: EngineConfig,
    ) -> Self {
        Self {
            runner,
            gate,
            audit: StdMutex::new(audit),
            locks: TargetLocks::new(),
            config,
        }
    }

    /// Render every step of a procedure without executing anything. Fails on
    /// the first missing parameter, before any external call is made.
    pub fn preview(
        &self,
        procedure: &Procedure,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<StepPreview>> {
        procedure
            .steps
            .iter()
            .map(|step| {
                let rendered = template::render(&step.name, &step.command, params)?;
                Ok(StepPreview {
                    step: step.name.clone(),
                    rendered_command: rendered,
                    predicted_effect: step.predicted_effect.clone(),
                    expects: step.success.describe(),
                    destructive: step.destructive,
                    idempotent: step.idempotent,
                })
            })
            .collect()
    }

    /// Run a procedure end to end.
    ///
    /// Returns the execution record when the run ends `Succeeded` or (after
    /// an accepted, successful rollback) `RolledBack`. A denied confirmation
    /// surfaces as [`Error::ConfirmationRequired`], a failed step as
    /// [`Error::StepExecution`], and a failed rollback as the fatal
    /// [`Error::Rollback`]; the full trail is in the audit log in all cases.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionRecord> {
        // Serialize against anything else touching this target. Held across
        // the rollback too: the pair is one critical section.
        let _guard = self.locks.acquire(&request.target).await;

        let (mut record, failure) = self
            .run_procedure(
                &request.procedure,
                &request.target,
                &request.params,
                &request.operator,
            )
            .await?;

        let failure = match failure {
            None => return Ok(record),
            Some(f) => f,
        };

        if let (StepFailure::Execution { .. }, Some(rollback)) = (&failure, &request.rollback) {
            if self.gate.confirm_rollback(rollback).await {
                info!(procedure = %rollback.id, "running rollback");
                let (rb_record, rb_failure) = self
                    .run_procedure(rollback, &request.target, &request.params, &request.operator)
                    .await
                    .map_err(|e| Error::Rollback {
                        procedure: rollback.id.clone(),
                        step: String::new(),
                        reason: e.to_string(),
                    })?;

                if let Some(rb_failure) = rb_failure {
                    return Err(Error::Rollback {
                        procedure: rollback.id.clone(),
                        step: rb_failure.step().to_string(),
                        reason: rb_failure.describe(),
                    });
                }
                debug_assert_eq!(rb_record.state, ExecutionState::Succeeded);
                debug_assert!(record.state.can_transition(ExecutionState::RolledBack));

                record.state = ExecutionState::RolledBack;
                record.finished_at = Some(Utc::now());
                self.audit_append(
                    &request.operator,
                    AuditEvent::ExecutionFinished {
                        record: record.clone(),
                    },
                )?;
                return Ok(record);
            }
            warn!(procedure = %request.procedure.id, "rollback declined, leaving partial state");
        }

        Err(failure.into_error())
    }

    /// Run one procedure's steps in order. Audits everything; returns the
    /// record plus the failure that stopped it, if any. Does not recurse into
    /// rollbacks.
    async fn run_procedure(
        &self,
        procedure: &Procedure,
        target: &Target,
        params: &BTreeMap<String, String>,
        operator: &str,
    ) -> Result<(ExecutionRecord, Option<StepFailure>)> {
        // A step-less procedure would record a Succeeded no-op.
        if procedure.steps.is_empty() {
            return Err(Error::EmptyProcedure {
                id: procedure.id.clone(),
            });
        }

        let previews = self.preview(procedure, params)?;
        let execution_id = Uuid::new_v4();
        let mut state = ExecutionState::Planned;

        self.audit_append(
            operator,
            AuditEvent::PlanSelected {
                execution_id,
                procedure_id: procedure.id.clone(),
                procedure_version: procedure.version,
                target: target.clone(),
            },
        )?;

        let mut record = ExecutionRecord {
            id: execution_id,
            procedure_id: procedure.id.clone(),
            procedure_version: procedure.version,
            target: target.clone(),
            params: params.clone(),
            operator: operator.to_string(),
            state,
            steps: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        };

        let mut failure: Option<StepFailure> = None;

        for (step, preview) in procedure.steps.iter().zip(&previews) {
            if failure.is_some() {
                let outcome = StepOutcome {
                    step: step.name.clone(),
                    state: StepState::Skipped,
                    rendered_command: preview.rendered_command.clone(),
                    attempts: 0,
                    confirmation: None,
                    destructive: step.destructive,
                    output_summary: None,
                    started_at: None,
                    finished_at: None,
                };
                self.audit_append(
                    operator,
                    AuditEvent::StepFinished {
                        execution_id,
                        outcome: outcome.clone(),
                    },
                )?;
                record.steps.push(outcome);
                continue;
            }

            // Confirmation gate. Destructive or non-idempotent steps block
            // here; never auto-executed.
            let mut confirmation = None;
            if !step.safe_to_auto_run() {
                debug_assert!(state.can_transition(ExecutionState::AwaitingConfirmation));
                state = ExecutionState::AwaitingConfirmation;

                if self.gate.confirm_step(preview).await {
                    let confirmation_id = Uuid::new_v4();
                    self.audit_append(
                        operator,
                        AuditEvent::ConfirmationGranted {
                            execution_id,
                            step: step.name.clone(),
                            confirmation_id,
                        },
                    )?;
                    confirmation = Some(confirmation_id);
                } else {
                    self.audit_append(
                        operator,
                        AuditEvent::ConfirmationDenied {
                            execution_id,
                            step: step.name.clone(),
                        },
                    )?;
                    failure = Some(StepFailure::Denied {
                        step: step.name.clone(),
                    });
                    record.steps.push(StepOutcome {
                        step: step.name.clone(),
                        state: StepState::Skipped,
                        rendered_command: preview.rendered_command.clone(),
                        attempts: 0,
                        confirmation: None,
                        destructive: step.destructive,
                        output_summary: Some("confirmation denied".to_string()),
                        started_at: None,
                        finished_at: None,
                    });
                    continue;
                }
            }

            if state != ExecutionState::Running {
                debug_assert!(state.can_transition(ExecutionState::Running));
                state = ExecutionState::Running;
            }

            // Recorded before the effect, so a crash mid-step still leaves
            // the attempt in the trail.
            self.audit_append(
                operator,
                AuditEvent::StepStarted {
                    execution_id,
                    step: step.name.clone(),
                    rendered_command: preview.rendered_command.clone(),
                    predicted_effect: step.predicted_effect.clone(),
                },
            )?;

            let outcome = self
                .run_step(step, preview, confirmation, &mut failure)
                .await;

            self.audit_append(
                operator,
                AuditEvent::StepFinished {
                    execution_id,
                    outcome: outcome.clone(),
                },
            )?;
            record.steps.push(outcome);
        }

        let final_state = if failure.is_some() {
            ExecutionState::Failed
        } else {
            debug_assert!(state.can_transition(ExecutionState::Succeeded));
            ExecutionState::Succeeded
        };
        record.state = final_state;
        record.finished_at = Some(Utc::now());
        debug_assert!(record.destructive_steps_confirmed());

        self.audit_append(
            operator,
            AuditEvent::ExecutionFinished {
                record: record.clone(),
            },
        )?;

        Ok((record, failure))
    }

    /// Run one step with timeout and bounded retries. Only idempotent,
    /// non-destructive steps retry, and never after a timeout: retrying a
    /// timed-out mutation risks double-application.
    async fn run_step(
        &self,
        step: &Step,
        preview: &StepPreview,
        confirmation: Option<Uuid>,
        failure: &mut Option<StepFailure>,
    ) -> StepOutcome {
        let started_at = Utc::now();
        let retryable = step.idempotent && !step.destructive;
        let max_attempts = if retryable {
            1 + self.config.max_step_retries
        } else {
            1
        };

        let mut attempts = 0;
        let mut observed = String::new();
        let mut succeeded = false;

        while attempts < max_attempts {
            attempts += 1;
            let spec = match CommandSpec::parse(&preview.rendered_command) {
                Ok(spec) => spec,
                Err(e) => {
                    observed = e.to_string();
                    break;
                }
            };

            let timeout = Duration::from_secs(step.timeout_secs);
            match tokio::time::timeout(timeout, self.runner.run(spec)).await {
                Err(_) => {
                    observed = format!("timed out after {}s", step.timeout_secs);
                    // Timed out means Failed, never silently retried.
                    break;
                }
                Ok(Err(e)) => {
                    observed = e.to_string();
                }
                Ok(Ok(output)) => {
                    if step.success.holds(&output) {
                        observed = output.summary();
                        succeeded = true;
                        break;
                    }
                    observed = output.summary();
                }
            }

            if attempts < max_attempts {
                let backoff = self.config.retry_backoff_ms * 2u64.pow(attempts - 1);
                warn!(
                    step = %step.name,
                    attempt = attempts,
                    backoff_ms = backoff,
                    "step failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        if !succeeded {
            *failure = Some(StepFailure::Execution {
                step: step.name.clone(),
                expected: step.success.describe(),
                observed: observed.clone(),
            });
        }

        StepOutcome {
            step: step.name.clone(),
            state: if succeeded {
                StepState::Succeeded
            } else {
                StepState::Failed
            },
            rendered_command: preview.rendered_command.clone(),
            attempts,
            confirmation,
            destructive: step.destructive,
            output_summary: Some(observed),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    fn audit_append(&self, operator: &str, event: AuditEvent) -> Result<()> {
        self.audit
            .lock()
            .map_err(|_| Error::Audit("audit log poisoned".to_string()))?
            .append(operator, event)?;
        Ok(())
    }
}
