//! Default parameter inference for procedure templates.
//!
//! Most step parameters are recoverable from the target and the collected
//! evidence; operator-supplied `--param` values override anything inferred.

use std::collections::BTreeMap;

use mend_engine::collect::extract_lock_id;
use mend_engine::{EngineConfig, Finding, Target};

/// Infer default parameters from the target, config, and findings.
#[must_use]
pub fn default_params(
    target: &Target,
    config: &EngineConfig,
    findings: &[Finding],
) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    match target {
        Target::Kubernetes {
            kind,
            namespace,
            name,
        } => {
            params.insert("name".to_string(), name.clone());
            if let Some(ns) = namespace {
                params.insert("namespace".to_string(), ns.clone());
            }
            match kind.as_str() {
                "node" => {
                    params.insert("node".to_string(), name.clone());
                }
                "deployment" => {
                    params.insert("deployment".to_string(), name.clone());
                }
                "pod" => {
                    // A pod's owning deployment is usually the pod name with
                    // the replica-set and pod hash suffixes stripped.
                    params.insert("deployment".to_string(), owner_name(name));
                }
                _ => {}
            }
        }
        Target::Terraform { address, .. } => {
            params.insert("dir".to_string(), config.terraform_dir.clone());
            if let Some(address) = address {
                params.insert("address".to_string(), address.clone());
            }
        }
    }

    // A lock ID surfaced in the evidence feeds force-unlock directly.
    for finding in findings {
        if let Some(lock_id) = extract_lock_id(&finding.evidence_text()) {
            params.insert("lock_id".to_string(), lock_id);
            break;
        }
    }

    params
}

/// Strip the hash suffixes Kubernetes appends to pod names.
///
/// `api-7b9f8c6d5-abc12` -> `api`, `payments-api-5d4f3e2c1-xyz` ->
/// `payments-api`. Names without hash-like suffixes pass through unchanged.
fn owner_name(pod_name: &str) -> String {
    let parts: Vec<&str> = pod_name.split('-').collect();
    if parts.len() <= 2 {
        return pod_name.to_string();
    }

    let looks_like_hash = |part: &str| {
        part.len() >= 3
            && part.len() <= 10
            && part.chars().all(|c| c.is_ascii_alphanumeric())
            && part.chars().any(|c| c.is_ascii_digit())
    };

    let mut first_hash_index = parts.len();
    for i in (0..parts.len()).rev() {
        if looks_like_hash(parts[i]) {
            first_hash_index = i;
        } else {
            break;
        }
    }

    if first_hash_index < parts.len() && first_hash_index > 0 {
        parts[..first_hash_index].join("-")
    } else {
        pod_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_engine::{Condition, Evidence, Severity};

    #[test]
    fn test_owner_name_strips_hashes() {
        assert_eq!(owner_name("api-7b9f8c6d5-abc12"), "api");
        assert_eq!(owner_name("payments-api-5d4f3e2c1-xyz99"), "payments-api");
        assert_eq!(owner_name("simple-pod"), "simple-pod");
    }

    #[test]
    fn test_pod_target_params() {
        let target = Target::pod("payments", "api-7b9f8c6d5-abc12");
        let params = default_params(&target, &EngineConfig::default(), &[]);
        assert_eq!(params.get("name").map(String::as_str), Some("api-7b9f8c6d5-abc12"));
        assert_eq!(params.get("namespace").map(String::as_str), Some("payments"));
        assert_eq!(params.get("deployment").map(String::as_str), Some("api"));
    }

    #[test]
    fn test_terraform_params_with_lock_id_from_evidence() {
        let target = Target::Terraform {
            workspace: "prod".to_string(),
            address: Some("aws_instance.web".to_string()),
        };
        let config = EngineConfig {
            terraform_dir: "/srv/infra".to_string(),
            ..EngineConfig::default()
        };
        let finding = Finding::new(target.clone(), Condition::StateLockHeld, Severity::Critical)
            .with_evidence(Evidence::new("terraform-plan", "lock ID: 7a1f3c9e-88d2"));

        let params = default_params(&target, &config, &[finding]);
        assert_eq!(params.get("dir").map(String::as_str), Some("/srv/infra"));
        assert_eq!(params.get("address").map(String::as_str), Some("aws_instance.web"));
        assert_eq!(params.get("lock_id").map(String::as_str), Some("7a1f3c9e-88d2"));
    }
}
