//! Built-in remediation procedures.
//!
//! Distilled from the cluster triage and Terraform state triage runbooks.
//! Conditions with no entry here (standalone OOM kills, pending PVCs)
//! deliberately have no automated remedy: the runbooks hand those to a
//! human, so the decision engine escalates with `NoMatch`.

use crate::catalog::{Catalog, Procedure, Step, SuccessPredicate, Trigger};
use crate::finding::{Condition, Severity};

fn step(
    name: &str,
    command: &str,
    success: SuccessPredicate,
    idempotent: bool,
    destructive: bool,
    predicted_effect: &str,
) -> Step {
    Step {
        name: name.to_string(),
        command: command.to_string(),
        success,
        idempotent,
        destructive,
        timeout_secs: 120,
        predicted_effect: predicted_effect.to_string(),
    }
}

/// The catalog of built-in procedures.
#[must_use]
pub fn builtin_catalog() -> Catalog {
    let mut catalog = Catalog::new();

    // --- Kubernetes runbook ---

    catalog.insert(Procedure {
        id: "restart-pod".to_string(),
        version: 1,
        name: "Restart crash-looping pod".to_string(),
        description: "Generic remedy for CrashLoopBackOff: delete the pod and let its \
                      controller recreate it."
            .to_string(),
        trigger: Trigger::on(Condition::CrashLoopBackOff).with_kind("pod"),
        steps: vec![
            step(
                "describe-pod",
                "kubectl describe pod {{name}} -n {{namespace}}",
                SuccessPredicate::ExitZero,
                true,
                false,
                "read the pod's events and container states (no change)",
            ),
            step(
                "delete-pod",
                "kubectl delete pod {{name}} -n {{namespace}}",
                SuccessPredicate::StdoutContains("deleted".to_string()),
                false,
                true,
                "delete the pod; its controller will schedule a replacement",
            ),
        ],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "raise-memory-limit".to_string(),
        version: 1,
        name: "Raise memory limit for OOM-killed workload".to_string(),
        description: "CrashLoopBackOff backed by OOM evidence (exit code 137 / OOMKilled): \
                      restarting alone will loop forever, so raise the container memory limit."
            .to_string(),
        trigger: Trigger::on(Condition::CrashLoopBackOff)
            .with_kind("pod")
            .with_evidence_pattern(r"(?i)oomkilled|exit[ -]?code:? ?137")
            .with_min_severity(Severity::Warning),
        steps: vec![
            step(
                "read-current-limits",
                "kubectl get deployment {{deployment}} -n {{namespace}} -o json",
                SuccessPredicate::ExitZero,
                true,
                false,
                "read the deployment's current resource limits (no change)",
            ),
            step(
                "patch-memory-limit",
                "kubectl set resources deployment {{deployment}} -n {{namespace}} \
                 -c {{container}} --limits=memory={{memory_limit}}",
                SuccessPredicate::StdoutContains("resource requirements updated".to_string()),
                false,
                true,
                "raise the container memory limit; triggers a rolling restart",
            ),
            step(
                "await-rollout",
                "kubectl rollout status deployment/{{deployment}} -n {{namespace}} --timeout=120s",
                SuccessPredicate::StdoutContains("successfully rolled out".to_string()),
                true,
                false,
                "wait for the new replica set to become ready (no change)",
            ),
        ],
        rollback: Some("undo-deployment-rollout".to_string()),
    });

    catalog.insert(Procedure {
        id: "undo-deployment-rollout".to_string(),
        version: 1,
        name: "Undo last deployment rollout".to_string(),
        description: "Revert a deployment to its previous revision.".to_string(),
        trigger: Trigger::on(Condition::DeploymentUnavailable).with_kind("deployment"),
        steps: vec![step(
            "rollout-undo",
            "kubectl rollout undo deployment/{{deployment}} -n {{namespace}}",
            SuccessPredicate::StdoutContains("rolled back".to_string()),
            false,
            true,
            "roll the deployment back to its previous revision",
        )],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "rollout-restart-deployment".to_string(),
        version: 1,
        name: "Rolling-restart unavailable deployment".to_string(),
        description: "Deployment stuck below desired availability: restart its pods in a \
                      controlled rollout."
            .to_string(),
        trigger: Trigger::on(Condition::DeploymentUnavailable)
            .with_kind("deployment")
            .with_evidence_pattern(r"(?i)unavailable|progress deadline"),
        steps: vec![
            step(
                "rollout-restart",
                "kubectl rollout restart deployment/{{deployment}} -n {{namespace}}",
                SuccessPredicate::StdoutContains("restarted".to_string()),
                false,
                true,
                "restart all pods of the deployment via a rolling update",
            ),
            step(
                "await-rollout",
                "kubectl rollout status deployment/{{deployment}} -n {{namespace}} --timeout=120s",
                SuccessPredicate::StdoutContains("successfully rolled out".to_string()),
                true,
                false,
                "wait for the rollout to complete (no change)",
            ),
        ],
        rollback: Some("undo-deployment-rollout".to_string()),
    });

    catalog.insert(Procedure {
        id: "fix-image-pull".to_string(),
        version: 1,
        name: "Recover from ImagePullBackOff".to_string(),
        description: "Surface the pull error (bad tag, missing pull secret, registry outage), \
                      then delete the pod to force a fresh pull once fixed."
            .to_string(),
        trigger: Trigger::on(Condition::ImagePullBackOff).with_kind("pod"),
        steps: vec![
            step(
                "inspect-events",
                "kubectl describe pod {{name}} -n {{namespace}}",
                SuccessPredicate::ExitZero,
                true,
                false,
                "read pull-failure events to identify the broken image reference (no change)",
            ),
            step(
                "delete-pod",
                "kubectl delete pod {{name}} -n {{namespace}}",
                SuccessPredicate::StdoutContains("deleted".to_string()),
                false,
                true,
                "delete the pod so the replacement retries the image pull",
            ),
        ],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "reschedule-pending-pod".to_string(),
        version: 1,
        name: "Unstick unschedulable pod".to_string(),
        description: "Pod pending with no feasible node, commonly a cordoned node or exhausted \
                      capacity; uncordoning is safe to repeat."
            .to_string(),
        trigger: Trigger::on(Condition::PodPending).with_kind("pod"),
        steps: vec![
            step(
                "inspect-scheduling-events",
                "kubectl describe pod {{name}} -n {{namespace}}",
                SuccessPredicate::ExitZero,
                true,
                false,
                "read scheduler events for the pending reason (no change)",
            ),
            step(
                "uncordon-node",
                "kubectl uncordon {{node}}",
                SuccessPredicate::ExitZero,
                true,
                false,
                "mark the node schedulable again; repeat-safe",
            ),
        ],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "uncordon-node".to_string(),
        version: 1,
        name: "Uncordon node".to_string(),
        description: "Return a cordoned node to the scheduler.".to_string(),
        trigger: Trigger::on(Condition::NodeNotReady)
            .with_kind("node")
            .with_evidence_pattern(r"(?i)cordon|unschedulable"),
        steps: vec![step(
            "uncordon",
            "kubectl uncordon {{node}}",
            SuccessPredicate::ExitZero,
            true,
            false,
            "mark the node schedulable again; repeat-safe",
        )],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "drain-node".to_string(),
        version: 1,
        name: "Drain unhealthy node".to_string(),
        description: "Node stuck NotReady: evict its workloads so controllers reschedule them \
                      elsewhere before the node is recycled."
            .to_string(),
        trigger: Trigger::on(Condition::NodeNotReady).with_kind("node"),
        steps: vec![
            step(
                "cordon-node",
                "kubectl cordon {{node}}",
                SuccessPredicate::ExitZero,
                true,
                false,
                "stop new pods from scheduling onto the node; repeat-safe",
            ),
            step(
                "drain-node",
                "kubectl drain {{node}} --ignore-daemonsets --delete-emptydir-data --timeout=120s",
                SuccessPredicate::StdoutContains("drained".to_string()),
                false,
                true,
                "evict all workloads from the node; emptyDir volumes are lost",
            ),
        ],
        rollback: Some("uncordon-node".to_string()),
    });

    // --- Terraform runbook ---

    catalog.insert(Procedure {
        id: "force-unlock".to_string(),
        version: 1,
        name: "Release stuck state lock".to_string(),
        description: "State lock held by a dead run: confirm the lock is still held, then \
                      force-unlock with the lock ID from the error output."
            .to_string(),
        trigger: Trigger::on(Condition::StateLockHeld).with_kind("terraform"),
        steps: vec![
            step(
                "confirm-lock-held",
                "terraform -chdir={{dir}} plan -input=false -lock-timeout=0s -no-color",
                SuccessPredicate::ExitCode(1),
                true,
                false,
                "verify the lock error still reproduces before unlocking (no change)",
            ),
            step(
                "force-unlock",
                "terraform -chdir={{dir}} force-unlock -force {{lock_id}}",
                SuccessPredicate::StdoutContains("successfully unlocked".to_string()),
                false,
                true,
                "discard the state lock; unsafe if the owning run is still alive",
            ),
        ],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "plan-and-apply-drift".to_string(),
        version: 1,
        name: "Reconcile state drift".to_string(),
        description: "Recorded state diverged from real infrastructure: re-plan to confirm the \
                      drift, apply, then verify the plan is clean."
            .to_string(),
        trigger: Trigger::on(Condition::StateDrift).with_kind("terraform"),
        steps: vec![
            step(
                "confirm-drift",
                "terraform -chdir={{dir}} plan -input=false -detailed-exitcode -no-color",
                SuccessPredicate::ExitCode(2),
                true,
                false,
                "confirm drift is still present (detailed exit code 2, no change)",
            ),
            step(
                "apply",
                "terraform -chdir={{dir}} apply -input=false -auto-approve -no-color",
                SuccessPredicate::StdoutContains("Apply complete".to_string()),
                false,
                true,
                "apply the plan, mutating real infrastructure to match configuration",
            ),
            step(
                "verify-clean",
                "terraform -chdir={{dir}} plan -input=false -detailed-exitcode -no-color",
                SuccessPredicate::ExitZero,
                true,
                false,
                "verify a follow-up plan reports no changes (no change)",
            ),
        ],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "state-rm-orphan".to_string(),
        version: 1,
        name: "Remove orphaned resource from state".to_string(),
        description: "Resource exists only in state (config was removed): drop it from state so \
                      Terraform stops planning its destruction. The real resource is untouched."
            .to_string(),
        trigger: Trigger::on(Condition::OrphanedResource).with_kind("terraform"),
        steps: vec![
            step(
                "show-resource",
                "terraform -chdir={{dir}} state show {{address}}",
                SuccessPredicate::ExitZero,
                true,
                false,
                "display the orphaned resource's recorded attributes (no change)",
            ),
            step(
                "state-rm",
                "terraform -chdir={{dir}} state rm {{address}}",
                SuccessPredicate::StdoutContains("Removed".to_string()),
                false,
                true,
                "remove the address from state; Terraform forgets the resource",
            ),
        ],
        rollback: None,
    });

    catalog.insert(Procedure {
        id: "retry-apply".to_string(),
        version: 1,
        name: "Retry failed apply".to_string(),
        description: "Apply failed partway (provider throttling, transient API errors): \
                      re-plan from the partial state, then apply the remainder."
            .to_string(),
        trigger: Trigger::on(Condition::ApplyFailed).with_kind("terraform"),
        steps: vec![
            step(
                "re-plan",
                "terraform -chdir={{dir}} plan -input=false -no-color",
                SuccessPredicate::ExitZero,
                true,
                false,
                "re-plan from current state to see what remains (no change)",
            ),
            step(
                "apply-remainder",
                "terraform -chdir={{dir}} apply -input=false -auto-approve -no-color",
                SuccessPredicate::StdoutContains("Apply complete".to_string()),
                false,
                true,
                "apply the remaining changes to real infrastructure",
            ),
        ],
        rollback: None,
    });

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_rollback_reference_resolves() {
        let catalog = builtin_catalog();
        for procedure in catalog.iter() {
            if let Some(rollback) = &procedure.rollback {
                assert!(
                    catalog.get(rollback).is_ok(),
                    "procedure '{}' references unknown rollback '{}'",
                    procedure.id,
                    rollback
                );
            }
        }
    }

    #[test]
    fn test_destructive_procedures_require_confirmation() {
        let catalog = builtin_catalog();
        for procedure in catalog.iter() {
            if procedure.destructive_step_count() > 0 {
                assert!(
                    procedure.requires_confirmation(),
                    "procedure '{}' has destructive steps but no confirmation requirement",
                    procedure.id
                );
            }
        }
    }

    #[test]
    fn test_oom_remediation_is_more_specific_than_restart() {
        let catalog = builtin_catalog();
        let oom = catalog.get("raise-memory-limit").unwrap();
        let restart = catalog.get("restart-pod").unwrap();
        assert!(oom.trigger.specificity() > restart.trigger.specificity());
    }

    #[test]
    fn test_builtin_step_templates_have_named_params() {
        let catalog = builtin_catalog();
        let drain = catalog.get("drain-node").unwrap();
        assert_eq!(
            drain.required_params().into_iter().collect::<Vec<_>>(),
            vec!["node".to_string()]
        );

        let unlock = catalog.get("force-unlock").unwrap();
        let params = unlock.required_params();
        assert!(params.contains("dir"));
        assert!(params.contains("lock_id"));
    }
}
