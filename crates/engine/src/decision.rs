//! Decision engine: match findings to catalog procedures and rank them.

use tracing::{debug, info};

use crate::catalog::{Catalog, Procedure};
use crate::error::{Error, Result};
use crate::finding::Finding;

/// A procedure selected for a specific finding, with its ranking inputs.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub procedure: Procedure,
    pub finding: Finding,
    pub specificity: u32,
}

/// Matches findings against the catalog. Never guesses: when nothing
/// matches, the result is [`Error::NoMatch`] and a human takes over.
pub struct DecisionEngine<'a> {
    catalog: &'a Catalog,
}

impl<'a> DecisionEngine<'a> {
    #[must_use]
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Rank all matching procedures across the given findings.
    ///
    /// Ordering: most specific trigger first; equal specificity prefers the
    /// procedure with fewer destructive steps; remaining ties order by id so
    /// the ranking is stable. A procedure matched by several findings appears
    /// once, paired with the first finding that matched it.
    pub fn decide(&self, findings: &[Finding]) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();

        for finding in findings {
            for procedure in self.catalog.matching(finding) {
                debug!(
                    procedure = %procedure.id,
                    condition = %finding.condition,
                    "trigger matched"
                );
                candidates.push(Candidate {
                    procedure: procedure.clone(),
                    finding: finding.clone(),
                    specificity: procedure.trigger.specificity(),
                });
            }
        }

        if candidates.is_empty() {
            return Err(Error::NoMatch {
                findings: findings.to_vec(),
            });
        }

        candidates.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then_with(|| {
                    a.procedure
                        .destructive_step_count()
                        .cmp(&b.procedure.destructive_step_count())
                })
                .then_with(|| a.procedure.id.cmp(&b.procedure.id))
        });
        // Same procedure matched by several findings: the sort key depends
        // only on the procedure, so duplicates are adjacent here.
        candidates.dedup_by(|a, b| a.procedure.id == b.procedure.id);

        info!(
            best = %candidates[0].procedure.id,
            total = candidates.len(),
            "decision ranked candidates"
        );

        Ok(candidates)
    }

    /// The single best candidate, if any.
    pub fn best(&self, findings: &[Finding]) -> Result<Candidate> {
        let mut ranked = self.decide(findings)?;
        Ok(ranked.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::builtin_catalog;
    use crate::catalog::{Procedure, Step, SuccessPredicate, Trigger};
    use crate::finding::{Condition, Evidence, Severity};
    use crate::target::Target;

    fn finding(condition: Condition, evidence: &str) -> Finding {
        Finding::new(Target::pod("payments", "api-1"), condition, Severity::Critical)
            .with_evidence(Evidence::new("pod-status", evidence))
    }

    #[test]
    fn test_no_match_escalates_instead_of_guessing() {
        let catalog = builtin_catalog();
        let engine = DecisionEngine::new(&catalog);

        // OomKilled has no built-in procedure by design.
        let findings = vec![finding(Condition::OomKilled, "OOMKilled")];
        let err = engine.decide(&findings).unwrap_err();
        assert!(matches!(err, Error::NoMatch { ref findings } if findings.len() == 1));
        assert!(err.is_escalation());
    }

    #[test]
    fn test_empty_findings_escalate() {
        let catalog = builtin_catalog();
        let engine = DecisionEngine::new(&catalog);
        assert!(matches!(engine.decide(&[]), Err(Error::NoMatch { .. })));
    }

    #[test]
    fn test_oom_evidence_selects_memory_remediation_over_restart() {
        let catalog = builtin_catalog();
        let engine = DecisionEngine::new(&catalog);

        let findings = vec![finding(
            Condition::CrashLoopBackOff,
            "last state terminated, exit code: 137",
        )];
        let ranked = engine.decide(&findings).unwrap();

        assert_eq!(ranked[0].procedure.id, "raise-memory-limit");
        assert!(ranked.iter().any(|c| c.procedure.id == "restart-pod"));
    }

    #[test]
    fn test_plain_crash_loop_gets_generic_restart() {
        let catalog = builtin_catalog();
        let engine = DecisionEngine::new(&catalog);

        let findings = vec![finding(
            Condition::CrashLoopBackOff,
            "back-off restarting failed container, exit code: 1",
        )];
        let best = engine.best(&findings).unwrap();
        assert_eq!(best.procedure.id, "restart-pod");
    }

    #[test]
    fn test_procedure_matched_by_several_findings_ranks_once() {
        let catalog = builtin_catalog();
        let engine = DecisionEngine::new(&catalog);

        let findings = vec![
            finding(Condition::CrashLoopBackOff, "back-off restarting, exit code: 1"),
            finding(Condition::CrashLoopBackOff, "back-off restarting, exit code: 1"),
        ];
        let ranked = engine.decide(&findings).unwrap();
        let restarts = ranked
            .iter()
            .filter(|c| c.procedure.id == "restart-pod")
            .count();
        assert_eq!(restarts, 1);
    }

    #[test]
    fn test_tie_breaks_on_fewest_destructive_steps() {
        let mut catalog = Catalog::new();
        let trigger = Trigger::on(Condition::StateDrift).with_kind("terraform");
        let destructive_step = Step {
            name: "apply".to_string(),
            command: "terraform apply".to_string(),
            success: SuccessPredicate::ExitZero,
            idempotent: false,
            destructive: true,
            timeout_secs: 60,
            predicted_effect: "apply".to_string(),
        };
        let safe_step = Step {
            name: "plan".to_string(),
            command: "terraform plan".to_string(),
            success: SuccessPredicate::ExitZero,
            idempotent: true,
            destructive: false,
            timeout_secs: 60,
            predicted_effect: "plan".to_string(),
        };

        catalog.insert(Procedure {
            id: "aggressive".to_string(),
            version: 1,
            name: "aggressive".to_string(),
            description: String::new(),
            trigger: trigger.clone(),
            steps: vec![destructive_step.clone(), destructive_step],
            rollback: None,
        });
        catalog.insert(Procedure {
            id: "gentle".to_string(),
            version: 1,
            name: "gentle".to_string(),
            description: String::new(),
            trigger,
            steps: vec![safe_step],
            rollback: None,
        });

        let engine = DecisionEngine::new(&catalog);
        let findings = vec![Finding::new(
            Target::Terraform {
                workspace: "prod".to_string(),
                address: None,
            },
            Condition::StateDrift,
            Severity::Warning,
        )];
        let ranked = engine.decide(&findings).unwrap();
        assert_eq!(ranked[0].procedure.id, "gentle");
        assert_eq!(ranked[1].procedure.id, "aggressive");
    }
}
