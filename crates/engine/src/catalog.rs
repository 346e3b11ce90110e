//! Action catalog: versioned remediation procedures and their triggers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::finding::{Condition, Finding, Severity};
use crate::runner::CommandOutput;
use crate::template;

/// Predicate deciding whether a step's command succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SuccessPredicate {
    /// Command exited 0.
    ExitZero,
    /// Command exited with this specific code.
    ExitCode(i32),
    /// Exit 0 and stdout contains the literal text.
    StdoutContains(String),
    /// Exit 0 and stdout matches the regex.
    StdoutMatches(String),
}

impl SuccessPredicate {
    /// Evaluate against a captured command output.
    #[must_use]
    pub fn holds(&self, output: &CommandOutput) -> bool {
        match self {
            Self::ExitZero => output.exit_code == 0,
            Self::ExitCode(code) => output.exit_code == *code,
            Self::StdoutContains(text) => output.exit_code == 0 && output.stdout.contains(text),
            Self::StdoutMatches(pattern) => {
                output.exit_code == 0
                    && Regex::new(pattern)
                        .map(|re| re.is_match(&output.stdout))
                        .unwrap_or(false)
            }
        }
    }

    /// What this predicate expects, for error messages and dry-run output.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ExitZero => "exit code 0".to_string(),
            Self::ExitCode(code) => format!("exit code {code}"),
            Self::StdoutContains(text) => format!("exit code 0 and stdout containing '{text}'"),
            Self::StdoutMatches(pattern) => format!("exit code 0 and stdout matching /{pattern}/"),
        }
    }
}

/// One remediation step: a command template plus its safety contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Handlebars command template with named parameters.
    pub command: String,
    pub success: SuccessPredicate,
    /// Safe to re-run against the same target with the same end state.
    pub idempotent: bool,
    /// Mutates the external system in a way that is hard to undo. Destructive
    /// steps never run without an explicit confirmation event.
    pub destructive: bool,
    /// Per-step timeout. A timed-out step is Failed, never retried.
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,
    /// Operator-facing description of what applying this step will do.
    pub predicted_effect: String,
}

fn default_step_timeout() -> u64 {
    120
}

impl Step {
    /// A step may run without confirmation only when it can neither destroy
    /// anything nor double-apply.
    #[must_use]
    pub fn safe_to_auto_run(&self) -> bool {
        !self.destructive && self.idempotent
    }
}

/// Trigger condition for a procedure. `condition` is mandatory; the optional
/// fields narrow the match and raise its specificity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub condition: Condition,
    /// Target kind (`pod`, `node`, `deployment`, `terraform`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Exact namespace / terraform workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Regex over the finding's joined evidence excerpts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_pattern: Option<String>,
    /// Minimum finding severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
}

impl Trigger {
    #[must_use]
    pub fn on(condition: Condition) -> Self {
        Self {
            condition,
            kind: None,
            namespace: None,
            evidence_pattern: None,
            min_severity: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_evidence_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.evidence_pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Whether this trigger matches the finding.
    #[must_use]
    pub fn matches(&self, finding: &Finding) -> bool {
        if finding.condition != self.condition {
            return false;
        }
        if let Some(kind) = &self.kind {
            if finding.subject.kind() != kind {
                return false;
            }
        }
        if let Some(ns) = &self.namespace {
            if finding.subject.namespace() != Some(ns.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if finding.severity < min {
                return false;
            }
        }
        if let Some(pattern) = &self.evidence_pattern {
            let matched = Regex::new(pattern)
                .map(|re| re.is_match(&finding.evidence_text()))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        true
    }

    /// Number of matched fields. More fields means a more specific trigger;
    /// the decision engine prefers higher specificity.
    #[must_use]
    pub fn specificity(&self) -> u32 {
        // Condition always counts as one.
        1 + u32::from(self.kind.is_some())
            + u32::from(self.namespace.is_some())
            + u32::from(self.evidence_pattern.is_some())
            + u32::from(self.min_severity.is_some())
    }
}

/// An ordered, named remediation plan for a diagnosed condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    pub version: u32,
    pub name: String,
    pub description: String,
    pub trigger: Trigger,
    pub steps: Vec<Step>,
    /// Id of the procedure offered if this one fails partway through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<String>,
}

impl Procedure {
    /// Count of destructive steps; the decision engine's tie-breaker.
    #[must_use]
    pub fn destructive_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.destructive).count()
    }

    /// Whether any step needs an operator confirmation before running.
    #[must_use]
    pub fn requires_confirmation(&self) -> bool {
        self.steps.iter().any(|s| !s.safe_to_auto_run())
    }

    /// Union of parameters referenced by the step command templates.
    #[must_use]
    pub fn required_params(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|s| template::required_params(&s.command))
            .collect()
    }
}

/// Registry of procedures, keyed by id, keeping only the newest version of
/// each. Built-ins first, optionally merged with operator-supplied YAML.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    procedures: BTreeMap<String, Procedure>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a procedure, replacing an existing entry only if the incoming
    /// version is newer or equal. Returns whether it was stored.
    pub fn insert(&mut self, procedure: Procedure) -> bool {
        match self.procedures.get(&procedure.id) {
            Some(existing) if existing.version > procedure.version => false,
            _ => {
                self.procedures.insert(procedure.id.clone(), procedure);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<&Procedure> {
        self.procedures.get(id).ok_or_else(|| Error::UnknownProcedure {
            id: id.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// All procedures whose trigger matches the finding.
    #[must_use]
    pub fn matching(&self, finding: &Finding) -> Vec<&Procedure> {
        self.procedures
            .values()
            .filter(|p| p.trigger.matches(finding))
            .collect()
    }

    /// Merge procedures from a YAML document (a sequence of procedures) over
    /// this catalog, honoring version precedence. Procedures without steps
    /// are rejected; they could never run.
    pub fn merge_yaml(&mut self, yaml: &str) -> Result<usize> {
        let procedures: Vec<Procedure> = serde_yaml::from_str(yaml)?;
        let mut merged = 0;
        for procedure in procedures {
            if procedure.steps.is_empty() {
                return Err(Error::EmptyProcedure { id: procedure.id });
            }
            if self.insert(procedure) {
                merged += 1;
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Evidence;
    use crate::target::Target;

    fn step(name: &str, destructive: bool, idempotent: bool) -> Step {
        Step {
            name: name.to_string(),
            command: format!("kubectl {name} {{{{name}}}}"),
            success: SuccessPredicate::ExitZero,
            idempotent,
            destructive,
            timeout_secs: 30,
            predicted_effect: format!("{name} the pod"),
        }
    }

    fn procedure(id: &str, version: u32, trigger: Trigger, steps: Vec<Step>) -> Procedure {
        Procedure {
            id: id.to_string(),
            version,
            name: id.to_string(),
            description: String::new(),
            trigger,
            steps,
            rollback: None,
        }
    }

    fn crash_loop_finding() -> Finding {
        Finding::new(
            Target::pod("payments", "api-1"),
            Condition::CrashLoopBackOff,
            Severity::Critical,
        )
        .with_evidence(Evidence::new("pod-status", "last exit code: 137"))
    }

    #[test]
    fn test_trigger_specificity_counts_fields() {
        let bare = Trigger::on(Condition::CrashLoopBackOff);
        let narrow = Trigger::on(Condition::CrashLoopBackOff)
            .with_kind("pod")
            .with_evidence_pattern("137");
        assert_eq!(bare.specificity(), 1);
        assert_eq!(narrow.specificity(), 3);
    }

    #[test]
    fn test_trigger_evidence_pattern_narrows_match() {
        let oom = Trigger::on(Condition::CrashLoopBackOff).with_evidence_pattern("137");
        let other = Trigger::on(Condition::CrashLoopBackOff).with_evidence_pattern("exit code: 1$");

        let finding = crash_loop_finding();
        assert!(oom.matches(&finding));
        assert!(!other.matches(&finding));
    }

    #[test]
    fn test_trigger_min_severity() {
        let trigger =
            Trigger::on(Condition::CrashLoopBackOff).with_min_severity(Severity::Critical);
        let mut finding = crash_loop_finding();
        assert!(trigger.matches(&finding));
        finding.severity = Severity::Warning;
        assert!(!trigger.matches(&finding));
    }

    #[test]
    fn test_catalog_version_precedence() {
        let mut catalog = Catalog::new();
        let trigger = Trigger::on(Condition::CrashLoopBackOff);
        assert!(catalog.insert(procedure("restart-pod", 2, trigger.clone(), vec![])));
        // Older version must not replace newer.
        assert!(!catalog.insert(procedure("restart-pod", 1, trigger.clone(), vec![])));
        assert_eq!(catalog.get("restart-pod").unwrap().version, 2);
        // Newer version replaces.
        assert!(catalog.insert(procedure("restart-pod", 3, trigger, vec![])));
        assert_eq!(catalog.get("restart-pod").unwrap().version, 3);
    }

    #[test]
    fn test_step_safe_to_auto_run() {
        assert!(step("get", false, true).safe_to_auto_run());
        assert!(!step("delete", true, true).safe_to_auto_run());
        assert!(!step("patch", false, false).safe_to_auto_run());
    }

    #[test]
    fn test_procedure_required_params_union() {
        let mut p = procedure(
            "restart-pod",
            1,
            Trigger::on(Condition::CrashLoopBackOff),
            vec![step("delete", true, false)],
        );
        p.steps[0].command = "kubectl delete pod {{name}} -n {{namespace}}".to_string();
        let params = p.required_params();
        assert!(params.contains("name"));
        assert!(params.contains("namespace"));
    }

    #[test]
    fn test_merge_yaml_round_trip() {
        let p = procedure(
            "custom-fix",
            1,
            Trigger::on(Condition::StateDrift),
            vec![step("plan", false, true)],
        );
        let yaml = serde_yaml::to_string(&vec![p]).unwrap();

        let mut catalog = Catalog::new();
        let merged = catalog.merge_yaml(&yaml).unwrap();
        assert_eq!(merged, 1);
        assert!(catalog.get("custom-fix").is_ok());
    }

    #[test]
    fn test_merge_yaml_rejects_step_less_procedure() {
        let p = procedure("hollow", 1, Trigger::on(Condition::StateDrift), vec![]);
        let yaml = serde_yaml::to_string(&vec![p]).unwrap();

        let mut catalog = Catalog::new();
        let err = catalog.merge_yaml(&yaml).unwrap_err();
        assert!(matches!(err, Error::EmptyProcedure { ref id } if id == "hollow"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_success_predicate_holds() {
        let ok = CommandOutput {
            exit_code: 0,
            stdout: "pod/api-1 deleted".to_string(),
            stderr: String::new(),
        };
        assert!(SuccessPredicate::ExitZero.holds(&ok));
        assert!(SuccessPredicate::StdoutContains("deleted".to_string()).holds(&ok));
        assert!(SuccessPredicate::StdoutMatches(r"pod/\S+ deleted".to_string()).holds(&ok));
        assert!(!SuccessPredicate::ExitCode(2).holds(&ok));

        let drift = CommandOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(SuccessPredicate::ExitCode(2).holds(&drift));
        assert!(!SuccessPredicate::ExitZero.holds(&drift));
    }
}
