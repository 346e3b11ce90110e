//! Target identifiers for diagnosed and remediated resources.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// A resource the engine can diagnose or remediate.
///
/// String form round-trips through [`std::str::FromStr`] / [`fmt::Display`]:
///
/// - Kubernetes: `pod/payments/api-7f9c4` (kind/namespace/name) or
///   `node/worker-3` for cluster-scoped kinds.
/// - Terraform: `tf:prod` (whole workspace) or `tf:prod:aws_instance.web`
///   (single resource address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "system", rename_all = "snake_case")]
pub enum Target {
    Kubernetes {
        kind: String,
        namespace: Option<String>,
        name: String,
    },
    Terraform {
        workspace: String,
        address: Option<String>,
    },
}

impl Target {
    /// Convenience constructor for a namespaced Kubernetes resource.
    #[must_use]
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Kubernetes {
            kind: "pod".to_string(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key used to serialize procedure executions per target.
    /// Two procedures sharing a lock key never interleave steps.
    #[must_use]
    pub fn lock_key(&self) -> String {
        self.to_string()
    }

    /// Kubernetes kind or the literal `terraform` for state targets.
    /// Used by trigger narrowing.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Kubernetes { kind, .. } => kind,
            Self::Terraform { .. } => "terraform",
        }
    }

    /// Namespace for namespaced Kubernetes resources; the workspace name for
    /// Terraform targets.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Kubernetes { namespace, .. } => namespace.as_deref(),
            Self::Terraform { workspace, .. } => Some(workspace),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubernetes {
                kind,
                namespace: Some(ns),
                name,
            } => write!(f, "{kind}/{ns}/{name}"),
            Self::Kubernetes {
                kind,
                namespace: None,
                name,
            } => write!(f, "{kind}/{name}"),
            Self::Terraform {
                workspace,
                address: Some(addr),
            } => write!(f, "tf:{workspace}:{addr}"),
            Self::Terraform {
                workspace,
                address: None,
            } => write!(f, "tf:{workspace}"),
        }
    }
}

impl std::str::FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidTarget {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rest) = s.strip_prefix("tf:") {
            let mut parts = rest.splitn(2, ':');
            let workspace = parts.next().unwrap_or_default();
            if workspace.is_empty() {
                return Err(invalid("missing terraform workspace"));
            }
            return Ok(Self::Terraform {
                workspace: workspace.to_string(),
                address: parts.next().map(ToString::to_string),
            });
        }

        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [kind, ns, name] if !kind.is_empty() && !ns.is_empty() && !name.is_empty() => {
                Ok(Self::Kubernetes {
                    kind: kind.to_lowercase(),
                    namespace: Some((*ns).to_string()),
                    name: (*name).to_string(),
                })
            }
            [kind, name] if !kind.is_empty() && !name.is_empty() => Ok(Self::Kubernetes {
                kind: kind.to_lowercase(),
                namespace: None,
                name: (*name).to_string(),
            }),
            _ => Err(invalid(
                "expected kind/namespace/name, kind/name, or tf:workspace[:address]",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced_pod() {
        let target: Target = "pod/payments/api-7f9c4".parse().unwrap();
        assert_eq!(
            target,
            Target::Kubernetes {
                kind: "pod".to_string(),
                namespace: Some("payments".to_string()),
                name: "api-7f9c4".to_string(),
            }
        );
        assert_eq!(target.to_string(), "pod/payments/api-7f9c4");
    }

    #[test]
    fn test_parse_cluster_scoped_node() {
        let target: Target = "node/worker-3".parse().unwrap();
        assert_eq!(target.kind(), "node");
        assert_eq!(target.namespace(), None);
        assert_eq!(target.to_string(), "node/worker-3");
    }

    #[test]
    fn test_parse_terraform_workspace_and_address() {
        let ws: Target = "tf:prod".parse().unwrap();
        assert_eq!(ws.kind(), "terraform");
        assert_eq!(ws.to_string(), "tf:prod");

        let addr: Target = "tf:prod:aws_instance.web".parse().unwrap();
        assert_eq!(addr.to_string(), "tf:prod:aws_instance.web");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Target>().is_err());
        assert!("tf:".parse::<Target>().is_err());
        assert!("a/b/c/d".parse::<Target>().is_err());
    }

    #[test]
    fn test_lock_key_distinguishes_targets() {
        let a = Target::pod("payments", "api-1");
        let b = Target::pod("payments", "api-2");
        assert_ne!(a.lock_key(), b.lock_key());
        assert_eq!(a.lock_key(), a.clone().lock_key());
    }
}
