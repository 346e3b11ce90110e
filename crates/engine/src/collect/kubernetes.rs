//! Kubernetes inspection checks and their parsers.
//!
//! All commands here are read-only (`kubectl get ...`). Parsing works on the
//! `-o json` representation so the checks stay independent of kubectl's
//! human-readable formatting.

use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::finding::{Condition, Evidence, Finding, Severity};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::target::Target;

/// Restart count above which a crash loop is critical rather than a warning.
const CRASH_LOOP_CRITICAL_RESTARTS: i64 = 3;

fn kubectl(config: &EngineConfig, args: &[&str]) -> CommandSpec {
    let mut full: Vec<String> = Vec::new();
    if let Some(context) = &config.kubectl_context {
        full.push("--context".to_string());
        full.push(context.clone());
    }
    full.extend(args.iter().map(ToString::to_string));
    CommandSpec {
        program: "kubectl".to_string(),
        args: full,
    }
}

fn require_success(check: &str, output: &CommandOutput) -> Result<()> {
    if output.success() {
        Ok(())
    } else {
        Err(Error::Collection {
            system: "kubectl".to_string(),
            reason: format!("{check}: {}", output.summary()),
        })
    }
}

fn parse_json(check: &str, output: &CommandOutput) -> Result<Value> {
    serde_json::from_str(&output.stdout).map_err(|e| Error::Collection {
        system: "kubectl".to_string(),
        reason: format!("{check}: unparseable json: {e}"),
    })
}

fn k8s_parts(target: &Target) -> (&str, Option<&str>, &str) {
    match target {
        Target::Kubernetes {
            kind,
            namespace,
            name,
        } => (kind.as_str(), namespace.as_deref(), name.as_str()),
        Target::Terraform { .. } => unreachable!("kubernetes check on terraform target"),
    }
}

/// `kubectl get pod <name> -o json`: crash loops, OOM kills, image pull
/// failures, pending pods.
pub(super) async fn pod_status(
    runner: &dyn CommandRunner,
    config: &EngineConfig,
    target: &Target,
) -> Result<Vec<Finding>> {
    let (_, namespace, name) = k8s_parts(target);
    let ns = namespace.unwrap_or("default");
    let output = runner
        .run(kubectl(config, &["get", "pod", name, "-n", ns, "-o", "json"]))
        .await?;
    require_success("pod-status", &output)?;
    let json = parse_json("pod-status", &output)?;
    Ok(findings_from_pod_json(target, &json))
}

/// `kubectl get events` scoped to the target: scheduling failures.
pub(super) async fn pod_events(
    runner: &dyn CommandRunner,
    config: &EngineConfig,
    target: &Target,
) -> Result<Vec<Finding>> {
    let (_, namespace, name) = k8s_parts(target);
    let ns = namespace.unwrap_or("default");
    let selector = format!("involvedObject.name={name}");
    let output = runner
        .run(kubectl(
            config,
            &[
                "get",
                "events",
                "-n",
                ns,
                "--field-selector",
                &selector,
                "-o",
                "json",
            ],
        ))
        .await?;
    require_success("pod-events", &output)?;
    let json = parse_json("pod-events", &output)?;
    Ok(findings_from_events_json(target, &json))
}

/// `kubectl get node <name> -o json`: readiness and cordon state.
pub(super) async fn node_status(
    runner: &dyn CommandRunner,
    config: &EngineConfig,
    target: &Target,
) -> Result<Vec<Finding>> {
    let (_, _, name) = k8s_parts(target);
    let output = runner
        .run(kubectl(config, &["get", "node", name, "-o", "json"]))
        .await?;
    require_success("node-status", &output)?;
    let json = parse_json("node-status", &output)?;
    Ok(findings_from_node_json(target, &json))
}

/// `kubectl get deployment <name> -o json`: availability shortfall.
pub(super) async fn deployment_status(
    runner: &dyn CommandRunner,
    config: &EngineConfig,
    target: &Target,
) -> Result<Vec<Finding>> {
    let (_, namespace, name) = k8s_parts(target);
    let ns = namespace.unwrap_or("default");
    let output = runner
        .run(kubectl(
            config,
            &["get", "deployment", name, "-n", ns, "-o", "json"],
        ))
        .await?;
    require_success("deployment-status", &output)?;
    let json = parse_json("deployment-status", &output)?;
    Ok(findings_from_deployment_json(target, &json))
}

/// `kubectl get pvc <name> -o json`: claims stuck unbound.
pub(super) async fn pvc_status(
    runner: &dyn CommandRunner,
    config: &EngineConfig,
    target: &Target,
) -> Result<Vec<Finding>> {
    let (_, namespace, name) = k8s_parts(target);
    let ns = namespace.unwrap_or("default");
    let output = runner
        .run(kubectl(config, &["get", "pvc", name, "-n", ns, "-o", "json"]))
        .await?;
    require_success("pvc-status", &output)?;
    let json = parse_json("pvc-status", &output)?;
    Ok(findings_from_pvc_json(target, &json))
}

fn findings_from_pod_json(target: &Target, json: &Value) -> Vec<Finding> {
    let mut findings = Vec::new();
    let status = &json["status"];

    let empty = Vec::new();
    let containers = status["containerStatuses"].as_array().unwrap_or(&empty);

    for container in containers {
        let container_name = container["name"].as_str().unwrap_or("unknown");
        let restarts = container["restartCount"].as_i64().unwrap_or(0);
        let waiting_reason = container["state"]["waiting"]["reason"].as_str();
        let waiting_message = container["state"]["waiting"]["message"]
            .as_str()
            .unwrap_or_default();
        let last_exit = container["lastState"]["terminated"]["exitCode"].as_i64();
        let last_reason = container["lastState"]["terminated"]["reason"].as_str();

        match waiting_reason {
            Some("CrashLoopBackOff") => {
                let severity = if restarts > CRASH_LOOP_CRITICAL_RESTARTS {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                let mut finding = Finding::new(target.clone(), Condition::CrashLoopBackOff, severity)
                    .with_evidence(Evidence::new(
                        "pod-status",
                        format!(
                            "container '{container_name}' waiting: CrashLoopBackOff \
                             ({restarts} restarts): {waiting_message}"
                        ),
                    ));
                if let Some(code) = last_exit {
                    finding = finding.with_evidence(Evidence::new(
                        "pod-status",
                        format!(
                            "last state terminated, exit code: {code}{}",
                            last_reason.map(|r| format!(" ({r})")).unwrap_or_default()
                        ),
                    ));
                    // 137 = SIGKILL, the OOM killer's signature.
                    if code == 137 || last_reason == Some("OOMKilled") {
                        finding.severity = Severity::Critical;
                    }
                }
                findings.push(finding);
            }
            Some("ImagePullBackOff" | "ErrImagePull") => {
                findings.push(
                    Finding::new(target.clone(), Condition::ImagePullBackOff, Severity::Warning)
                        .with_evidence(Evidence::new(
                            "pod-status",
                            format!(
                                "container '{container_name}' waiting: {}: {waiting_message}",
                                waiting_reason.unwrap_or_default()
                            ),
                        )),
                );
            }
            _ => {
                // Not crash-looping now, but a recorded OOM kill is a
                // finding on its own.
                if last_reason == Some("OOMKilled") {
                    findings.push(
                        Finding::new(target.clone(), Condition::OomKilled, Severity::Critical)
                            .with_evidence(Evidence::new(
                                "pod-status",
                                format!(
                                    "container '{container_name}' last terminated: OOMKilled \
                                     (exit code: {})",
                                    last_exit.unwrap_or(137)
                                ),
                            )),
                    );
                }
            }
        }
    }

    if status["phase"].as_str() == Some("Pending") {
        let unschedulable = status["conditions"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .find(|c| {
                c["type"].as_str() == Some("PodScheduled") && c["status"].as_str() == Some("False")
            });
        if let Some(condition) = unschedulable {
            let message = condition["message"].as_str().unwrap_or("unschedulable");
            findings.push(
                Finding::new(target.clone(), Condition::PodPending, Severity::Warning)
                    .with_evidence(Evidence::new("pod-status", format!("PodScheduled=False: {message}"))),
            );
        }
    }

    findings
}

fn findings_from_events_json(target: &Target, json: &Value) -> Vec<Finding> {
    let empty = Vec::new();
    let items = json["items"].as_array().unwrap_or(&empty);

    let mut scheduling_messages = Vec::new();
    for item in items {
        if item["reason"].as_str() == Some("FailedScheduling") {
            scheduling_messages.push(item["message"].as_str().unwrap_or_default().to_string());
        }
    }

    if scheduling_messages.is_empty() {
        return Vec::new();
    }

    let mut finding = Finding::new(target.clone(), Condition::PodPending, Severity::Warning);
    for message in scheduling_messages {
        finding = finding.with_evidence(Evidence::new("pod-events", format!("FailedScheduling: {message}")));
    }
    vec![finding]
}

fn findings_from_node_json(target: &Target, json: &Value) -> Vec<Finding> {
    let empty = Vec::new();
    let ready = json["status"]["conditions"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .find(|c| c["type"].as_str() == Some("Ready"));

    let is_ready = ready
        .map(|c| c["status"].as_str() == Some("True"))
        .unwrap_or(false);
    if is_ready {
        return Vec::new();
    }

    let mut finding = Finding::new(target.clone(), Condition::NodeNotReady, Severity::Critical);
    if let Some(condition) = ready {
        finding = finding.with_evidence(Evidence::new(
            "node-status",
            format!(
                "Ready={}: {}",
                condition["status"].as_str().unwrap_or("Unknown"),
                condition["message"].as_str().unwrap_or_default()
            ),
        ));
    } else {
        finding = finding.with_evidence(Evidence::new("node-status", "no Ready condition reported"));
    }
    if json["spec"]["unschedulable"].as_bool() == Some(true) {
        finding = finding.with_evidence(Evidence::new("node-status", "node is cordoned (unschedulable=true)"));
    }
    vec![finding]
}

fn findings_from_pvc_json(target: &Target, json: &Value) -> Vec<Finding> {
    if json["status"]["phase"].as_str() != Some("Pending") {
        return Vec::new();
    }

    let mut finding = Finding::new(target.clone(), Condition::PvcPending, Severity::Warning)
        .with_evidence(Evidence::new("pvc-status", "phase: Pending (claim not bound)"));
    if let Some(class) = json["spec"]["storageClassName"].as_str() {
        finding = finding.with_evidence(Evidence::new(
            "pvc-status",
            format!("storage class: {class}"),
        ));
    }
    vec![finding]
}

fn findings_from_deployment_json(target: &Target, json: &Value) -> Vec<Finding> {
    let desired = json["spec"]["replicas"].as_i64().unwrap_or(0);
    let available = json["status"]["availableReplicas"].as_i64().unwrap_or(0);
    if desired == 0 || available >= desired {
        return Vec::new();
    }

    let mut finding = Finding::new(
        target.clone(),
        Condition::DeploymentUnavailable,
        if available == 0 {
            Severity::Critical
        } else {
            Severity::Warning
        },
    )
    .with_evidence(Evidence::new(
        "deployment-status",
        format!("{available}/{desired} replicas available"),
    ));

    let empty = Vec::new();
    let progressing = json["status"]["conditions"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .find(|c| c["type"].as_str() == Some("Progressing"));
    if let Some(condition) = progressing {
        if condition["status"].as_str() == Some("False") {
            finding = finding.with_evidence(Evidence::new(
                "deployment-status",
                format!(
                    "Progressing=False: {}",
                    condition["message"].as_str().unwrap_or_default()
                ),
            ));
        }
    }
    vec![finding]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_target() -> Target {
        Target::pod("payments", "api-1")
    }

    #[test]
    fn test_crash_loop_parse_with_oom_exit_code() {
        let json: Value = serde_json::from_str(
            r#"{
              "status": {
                "phase": "Running",
                "containerStatuses": [{
                  "name": "app",
                  "restartCount": 9,
                  "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off 5m"}},
                  "lastState": {"terminated": {"exitCode": 137, "reason": "OOMKilled"}}
                }]
              }
            }"#,
        )
        .unwrap();

        let findings = findings_from_pod_json(&pod_target(), &json);
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.condition, Condition::CrashLoopBackOff);
        assert_eq!(finding.severity, Severity::Critical);
        assert!(finding.evidence_text().contains("exit code: 137"));
        assert!(finding.evidence_text().contains("OOMKilled"));
    }

    #[test]
    fn test_low_restart_crash_loop_is_warning() {
        let json: Value = serde_json::from_str(
            r#"{
              "status": {
                "phase": "Running",
                "containerStatuses": [{
                  "name": "app",
                  "restartCount": 2,
                  "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off"}},
                  "lastState": {"terminated": {"exitCode": 1, "reason": "Error"}}
                }]
              }
            }"#,
        )
        .unwrap();

        let findings = findings_from_pod_json(&pod_target(), &json);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_standalone_oom_kill() {
        let json: Value = serde_json::from_str(
            r#"{
              "status": {
                "phase": "Running",
                "containerStatuses": [{
                  "name": "app",
                  "restartCount": 1,
                  "state": {"running": {}},
                  "lastState": {"terminated": {"exitCode": 137, "reason": "OOMKilled"}}
                }]
              }
            }"#,
        )
        .unwrap();

        let findings = findings_from_pod_json(&pod_target(), &json);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::OomKilled);
    }

    #[test]
    fn test_pending_unschedulable_pod() {
        let json: Value = serde_json::from_str(
            r#"{
              "status": {
                "phase": "Pending",
                "conditions": [{
                  "type": "PodScheduled",
                  "status": "False",
                  "reason": "Unschedulable",
                  "message": "0/5 nodes are available: 5 Insufficient memory"
                }],
                "containerStatuses": []
              }
            }"#,
        )
        .unwrap();

        let findings = findings_from_pod_json(&pod_target(), &json);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::PodPending);
        assert!(findings[0].evidence_text().contains("Insufficient memory"));
    }

    #[test]
    fn test_healthy_pod_yields_nothing() {
        let json: Value = serde_json::from_str(
            r#"{
              "status": {
                "phase": "Running",
                "containerStatuses": [{
                  "name": "app",
                  "restartCount": 0,
                  "state": {"running": {}},
                  "lastState": {}
                }]
              }
            }"#,
        )
        .unwrap();
        assert!(findings_from_pod_json(&pod_target(), &json).is_empty());
    }

    #[test]
    fn test_node_not_ready_with_cordon_evidence() {
        let json: Value = serde_json::from_str(
            r#"{
              "spec": {"unschedulable": true},
              "status": {
                "conditions": [{
                  "type": "Ready",
                  "status": "False",
                  "message": "kubelet stopped posting node status"
                }]
              }
            }"#,
        )
        .unwrap();

        let target = Target::Kubernetes {
            kind: "node".to_string(),
            namespace: None,
            name: "worker-3".to_string(),
        };
        let findings = findings_from_node_json(&target, &json);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::NodeNotReady);
        assert!(findings[0].evidence_text().contains("cordoned"));
    }

    #[test]
    fn test_pending_pvc() {
        let json: Value = serde_json::from_str(
            r#"{
              "spec": {"storageClassName": "standard"},
              "status": {"phase": "Pending"}
            }"#,
        )
        .unwrap();

        let target = Target::Kubernetes {
            kind: "pvc".to_string(),
            namespace: Some("payments".to_string()),
            name: "data".to_string(),
        };
        let findings = findings_from_pvc_json(&target, &json);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::PvcPending);
        assert!(findings[0].evidence_text().contains("standard"));
    }

    #[test]
    fn test_bound_pvc_yields_nothing() {
        let json: Value = serde_json::from_str(r#"{"status": {"phase": "Bound"}}"#).unwrap();
        let target = Target::Kubernetes {
            kind: "pvc".to_string(),
            namespace: Some("payments".to_string()),
            name: "data".to_string(),
        };
        assert!(findings_from_pvc_json(&target, &json).is_empty());
    }

    #[test]
    fn test_deployment_availability_shortfall() {
        let json: Value = serde_json::from_str(
            r#"{
              "spec": {"replicas": 3},
              "status": {
                "availableReplicas": 1,
                "conditions": [{
                  "type": "Progressing",
                  "status": "False",
                  "message": "ReplicaSet has timed out progressing"
                }]
              }
            }"#,
        )
        .unwrap();

        let target = Target::Kubernetes {
            kind: "deployment".to_string(),
            namespace: Some("payments".to_string()),
            name: "api".to_string(),
        };
        let findings = findings_from_deployment_json(&target, &json);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::DeploymentUnavailable);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].evidence_text().contains("1/3"));
    }

    #[test]
    fn test_failed_scheduling_events() {
        let json: Value = serde_json::from_str(
            r#"{"items": [
              {"reason": "FailedScheduling", "message": "0/5 nodes available"},
              {"reason": "Pulled", "message": "image pulled"}
            ]}"#,
        )
        .unwrap();

        let findings = findings_from_events_json(&pod_target(), &json);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].condition, Condition::PodPending);
        assert_eq!(findings[0].evidence.len(), 1);
    }
}
