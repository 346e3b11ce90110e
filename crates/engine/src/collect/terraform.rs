//! Terraform inspection checks and their parsers.
//!
//! `terraform plan -detailed-exitcode` is the workhorse: exit 0 means clean,
//! 2 means drift, 1 means the plan itself failed - which is where lock
//! contention and broken applies show up.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::finding::{Condition, Evidence, Finding, Severity};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::target::Target;

/// Max number of plan lines carried as evidence on a drift finding.
const PLAN_EVIDENCE_LINES: usize = 10;

fn lock_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ID:\s*([0-9a-fA-F][0-9a-fA-F-]+)").expect("valid regex"))
}

fn destroyed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\s+(\S+)\s+will be destroyed").expect("valid regex"))
}

/// Pull the lock ID out of a "state lock" error message, for the
/// force-unlock procedure's `lock_id` parameter.
#[must_use]
pub fn extract_lock_id(text: &str) -> Option<String> {
    lock_id_regex()
        .captures(text)
        .map(|captures| captures[1].to_string())
}

fn terraform(config: &EngineConfig, args: &[&str]) -> CommandSpec {
    let mut full = vec![format!("-chdir={}", config.terraform_dir)];
    full.extend(args.iter().map(ToString::to_string));
    CommandSpec {
        program: "terraform".to_string(),
        args: full,
    }
}

fn workspace(target: &Target) -> &str {
    match target {
        Target::Terraform { workspace, .. } => workspace,
        Target::Kubernetes { .. } => unreachable!("terraform check on kubernetes target"),
    }
}

/// `terraform plan -detailed-exitcode`: drift, lock contention, orphans,
/// broken plans.
pub(super) async fn plan(
    runner: &dyn CommandRunner,
    config: &EngineConfig,
    target: &Target,
) -> Result<Vec<Finding>> {
    let output = runner
        .run(terraform(
            config,
            &["plan", "-input=false", "-detailed-exitcode", "-no-color", "-lock-timeout=0s"],
        ))
        .await?;
    Ok(findings_from_plan(target, &output))
}

/// `terraform state list`: reachability probe for the state backend.
pub(super) async fn state_list(
    runner: &dyn CommandRunner,
    config: &EngineConfig,
    _target: &Target,
) -> Result<Vec<Finding>> {
    let output = runner.run(terraform(config, &["state", "list"])).await?;
    if output.success() {
        Ok(Vec::new())
    } else {
        Err(Error::Collection {
            system: "terraform".to_string(),
            reason: format!("state backend unreachable: {}", output.summary()),
        })
    }
}

fn findings_from_plan(target: &Target, output: &CommandOutput) -> Vec<Finding> {
    match output.exit_code {
        0 => Vec::new(),
        2 => {
            let mut findings = vec![drift_finding(target, output)];
            findings.extend(orphan_findings(target, output));
            findings
        }
        _ => {
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            if combined.to_lowercase().contains("state lock") {
                let mut finding =
                    Finding::new(target.clone(), Condition::StateLockHeld, Severity::Critical)
                        .with_evidence(Evidence::new("terraform-plan", output.summary()));
                if let Some(lock_id) = extract_lock_id(&combined) {
                    finding = finding.with_evidence(Evidence::new(
                        "terraform-plan",
                        format!("lock ID: {lock_id}"),
                    ));
                }
                vec![finding]
            } else {
                vec![Finding::new(
                    target.clone(),
                    Condition::ApplyFailed,
                    Severity::Critical,
                )
                .with_evidence(Evidence::new("terraform-plan", output.summary()))]
            }
        }
    }
}

fn drift_finding(target: &Target, output: &CommandOutput) -> Finding {
    // Prefer the "Plan: X to add, ..." summary line; fall back to the head
    // of the plan.
    let summary = output
        .stdout
        .lines()
        .find(|line| line.trim_start().starts_with("Plan:"))
        .map(ToString::to_string)
        .unwrap_or_else(|| {
            output
                .stdout
                .lines()
                .take(PLAN_EVIDENCE_LINES)
                .collect::<Vec<_>>()
                .join("\n")
        });

    Finding::new(target.clone(), Condition::StateDrift, Severity::Warning)
        .with_evidence(Evidence::new("terraform-plan", summary))
}

/// Resources the plan only destroys are orphans: they exist in state but no
/// longer in configuration. Whether to drop or re-import them is the
/// operator's call; the finding just surfaces them.
fn orphan_findings(target: &Target, output: &CommandOutput) -> Vec<Finding> {
    destroyed_regex()
        .captures_iter(&output.stdout)
        .map(|captures| {
            let address = captures[1].to_string();
            let subject = Target::Terraform {
                workspace: workspace(target).to_string(),
                address: Some(address.clone()),
            };
            Finding::new(subject, Condition::OrphanedResource, Severity::Warning).with_evidence(
                Evidence::new("terraform-plan", format!("# {address} will be destroyed")),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf_target() -> Target {
        Target::Terraform {
            workspace: "prod".to_string(),
            address: None,
        }
    }

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_clean_plan_yields_nothing() {
        let findings = findings_from_plan(&tf_target(), &output(0, "No changes.", ""));
        assert!(findings.is_empty());
    }

    #[test]
    fn test_drift_detected_on_exit_code_two() {
        let stdout = "aws_instance.web: Refreshing state...\n\
                      Plan: 1 to add, 2 to change, 0 to destroy.";
        let findings = findings_from_plan(&tf_target(), &output(2, stdout, ""));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::StateDrift);
        assert!(findings[0].evidence_text().contains("Plan: 1 to add"));
    }

    #[test]
    fn test_drift_with_orphaned_resources() {
        let stdout = "  # aws_instance.old will be destroyed\n\
                      \n\
                      Plan: 0 to add, 0 to change, 1 to destroy.";
        let findings = findings_from_plan(&tf_target(), &output(2, stdout, ""));
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].condition, Condition::StateDrift);

        let orphan = &findings[1];
        assert_eq!(orphan.condition, Condition::OrphanedResource);
        match &orphan.subject {
            Target::Terraform { address, .. } => {
                assert_eq!(address.as_deref(), Some("aws_instance.old"));
            }
            other => panic!("unexpected subject: {other}"),
        }
    }

    #[test]
    fn test_state_lock_error_extracts_lock_id() {
        let stderr = "Error: Error acquiring the state lock\n\
                      \n\
                      Lock Info:\n\
                      ID:        7a1f3c9e-88d2-4a2b-9c61-0f4a8b4deabc\n\
                      Operation: OperationTypePlan";
        let findings = findings_from_plan(&tf_target(), &output(1, "", stderr));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::StateLockHeld);
        assert!(findings[0]
            .evidence_text()
            .contains("lock ID: 7a1f3c9e-88d2-4a2b-9c61-0f4a8b4deabc"));
    }

    #[test]
    fn test_other_plan_failure_is_apply_failed() {
        let stderr = "Error: error configuring provider: throttled";
        let findings = findings_from_plan(&tf_target(), &output(1, "", stderr));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::ApplyFailed);
    }

    #[test]
    fn test_extract_lock_id() {
        assert_eq!(
            extract_lock_id("ID:   abc123-def"),
            Some("abc123-def".to_string())
        );
        assert_eq!(extract_lock_id("no lock here"), None);
    }
}
