//! Read-only diagnostic collection.
//!
//! Runs the inspection commands from the runbooks against the target and
//! normalizes their output into [`Finding`]s. Checks are independent and run
//! concurrently, each under its own timeout; a failed check degrades the
//! report instead of discarding it. Only when every check fails is the
//! external system considered unreachable.

mod kubernetes;
mod terraform;

pub use terraform::extract_lock_id;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::finding::{Condition, Finding};
use crate::runner::CommandRunner;
use crate::target::Target;

/// Status of one diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed { reason: String },
    TimedOut,
}

/// Per-check result inside a report.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub check: String,
    pub status: CheckStatus,
}

/// Collected findings plus the status of every check that produced them.
/// Partial results are normal: callers inspect `checks` for degraded runs.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub target: Target,
    pub findings: Vec<Finding>,
    pub checks: Vec<CheckOutcome>,
    pub collected_at: DateTime<Utc>,
}

impl CollectionReport {
    /// Whether some checks failed while others succeeded.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        let failed = self
            .checks
            .iter()
            .filter(|c| c.status != CheckStatus::Passed)
            .count();
        failed > 0 && failed < self.checks.len()
    }
}

/// The inspection checks the collector knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    PodStatus,
    PodEvents,
    NodeStatus,
    DeploymentStatus,
    PvcStatus,
    TerraformPlan,
    TerraformStateList,
}

impl Check {
    fn name(self) -> &'static str {
        match self {
            Self::PodStatus => "pod-status",
            Self::PodEvents => "pod-events",
            Self::NodeStatus => "node-status",
            Self::DeploymentStatus => "deployment-status",
            Self::PvcStatus => "pvc-status",
            Self::TerraformPlan => "terraform-plan",
            Self::TerraformStateList => "terraform-state-list",
        }
    }

    /// Conditions this check is able to confirm. Used to skip irrelevant
    /// checks when the operator supplies hypotheses.
    fn conditions(self) -> &'static [Condition] {
        match self {
            Self::PodStatus => &[
                Condition::CrashLoopBackOff,
                Condition::OomKilled,
                Condition::ImagePullBackOff,
                Condition::PodPending,
            ],
            Self::PodEvents => &[Condition::PodPending],
            Self::NodeStatus => &[Condition::NodeNotReady],
            Self::DeploymentStatus => &[Condition::DeploymentUnavailable],
            Self::PvcStatus => &[Condition::PvcPending],
            Self::TerraformPlan => &[
                Condition::StateDrift,
                Condition::StateLockHeld,
                Condition::OrphanedResource,
                Condition::ApplyFailed,
            ],
            // Reachability probe for the state store; confirms nothing on
            // its own.
            Self::TerraformStateList => &[],
        }
    }

    fn relevant(self, hypotheses: &[Condition]) -> bool {
        if hypotheses.is_empty() {
            return true;
        }
        // Reachability probes always run.
        self.conditions().is_empty()
            || self.conditions().iter().any(|c| hypotheses.contains(c))
    }
}

/// Runs read-only inspection commands and normalizes results into findings.
pub struct Collector {
    runner: Arc<dyn CommandRunner>,
    config: EngineConfig,
}

impl Collector {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, config: EngineConfig) -> Self {
        Self { runner, config }
    }

    /// Collect findings for a target, optionally narrowed by condition
    /// hypotheses.
    ///
    /// Returns [`Error::Collection`] only when every check failed; partial
    /// failure is reported per-check in the returned report.
    pub async fn collect(
        &self,
        target: &Target,
        hypotheses: &[Condition],
    ) -> Result<CollectionReport> {
        let checks: Vec<Check> = checks_for(target)
            .into_iter()
            .filter(|c| c.relevant(hypotheses))
            .collect();

        let timeout = Duration::from_secs(self.config.check_timeout_secs);
        let runs = checks.iter().map(|check| {
            let check = *check;
            async move {
                let result = tokio::time::timeout(timeout, self.run_check(check, target)).await;
                (check, result)
            }
        });

        let mut findings = Vec::new();
        let mut outcomes = Vec::new();

        for (check, result) in join_all(runs).await {
            match result {
                Ok(Ok(mut found)) => {
                    debug!(check = check.name(), count = found.len(), "check passed");
                    findings.append(&mut found);
                    outcomes.push(CheckOutcome {
                        check: check.name().to_string(),
                        status: CheckStatus::Passed,
                    });
                }
                Ok(Err(e)) => {
                    warn!(check = check.name(), error = %e, "check failed");
                    outcomes.push(CheckOutcome {
                        check: check.name().to_string(),
                        status: CheckStatus::Failed {
                            reason: e.to_string(),
                        },
                    });
                }
                Err(_) => {
                    warn!(check = check.name(), "check timed out");
                    outcomes.push(CheckOutcome {
                        check: check.name().to_string(),
                        status: CheckStatus::TimedOut,
                    });
                }
            }
        }

        if !outcomes.is_empty() && outcomes.iter().all(|o| o.status != CheckStatus::Passed) {
            return Err(Error::Collection {
                system: match target {
                    Target::Kubernetes { .. } => "kubectl".to_string(),
                    Target::Terraform { .. } => "terraform".to_string(),
                },
                reason: "every diagnostic check failed or timed out".to_string(),
            });
        }

        Ok(CollectionReport {
            target: target.clone(),
            findings,
            checks: outcomes,
            collected_at: Utc::now(),
        })
    }

    async fn run_check(&self, check: Check, target: &Target) -> Result<Vec<Finding>> {
        match check {
            Check::PodStatus => kubernetes::pod_status(&*self.runner, &self.config, target).await,
            Check::PodEvents => kubernetes::pod_events(&*self.runner, &self.config, target).await,
            Check::NodeStatus => kubernetes::node_status(&*self.runner, &self.config, target).await,
            Check::DeploymentStatus => {
                kubernetes::deployment_status(&*self.runner, &self.config, target).await
            }
            Check::PvcStatus => kubernetes::pvc_status(&*self.runner, &self.config, target).await,
            Check::TerraformPlan => terraform::plan(&*self.runner, &self.config, target).await,
            Check::TerraformStateList => {
                terraform::state_list(&*self.runner, &self.config, target).await
            }
        }
    }
}

fn checks_for(target: &Target) -> Vec<Check> {
    match target {
        Target::Kubernetes { kind, .. } => match kind.as_str() {
            "pod" => vec![Check::PodStatus, Check::PodEvents],
            "node" => vec![Check::NodeStatus],
            "deployment" => vec![Check::DeploymentStatus],
            "pvc" | "persistentvolumeclaim" => vec![Check::PvcStatus],
            // Unknown kinds get the generic pod-style event check.
            _ => vec![Check::PodEvents],
        },
        Target::Terraform { .. } => vec![Check::TerraformPlan, Check::TerraformStateList],
    }
}
