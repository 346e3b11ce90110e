//! Structured diagnostic findings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::target::Target;

/// Diagnosed condition on a target. Populated from the two source runbooks:
/// the Kubernetes triage doc and the Terraform state triage doc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    // Kubernetes
    CrashLoopBackOff,
    OomKilled,
    ImagePullBackOff,
    PodPending,
    NodeNotReady,
    PvcPending,
    DeploymentUnavailable,
    // Terraform
    StateLockHeld,
    StateDrift,
    OrphanedResource,
    ApplyFailed,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CrashLoopBackOff => "crash-loop-backoff",
            Self::OomKilled => "oom-killed",
            Self::ImagePullBackOff => "image-pull-backoff",
            Self::PodPending => "pod-pending",
            Self::NodeNotReady => "node-not-ready",
            Self::PvcPending => "pvc-pending",
            Self::DeploymentUnavailable => "deployment-unavailable",
            Self::StateLockHeld => "state-lock-held",
            Self::StateDrift => "state-drift",
            Self::OrphanedResource => "orphaned-resource",
            Self::ApplyFailed => "apply-failed",
        }
    }

    /// Parse an operator-supplied hypothesis string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "crash-loop-backoff" | "crashloopbackoff" => Some(Self::CrashLoopBackOff),
            "oom-killed" | "oomkilled" => Some(Self::OomKilled),
            "image-pull-backoff" | "imagepullbackoff" | "errimagepull" => {
                Some(Self::ImagePullBackOff)
            }
            "pod-pending" | "pending" | "unschedulable" => Some(Self::PodPending),
            "node-not-ready" | "notready" => Some(Self::NodeNotReady),
            "pvc-pending" => Some(Self::PvcPending),
            "deployment-unavailable" => Some(Self::DeploymentUnavailable),
            "state-lock-held" | "lock" => Some(Self::StateLockHeld),
            "state-drift" | "drift" => Some(Self::StateDrift),
            "orphaned-resource" | "orphan" => Some(Self::OrphanedResource),
            "apply-failed" => Some(Self::ApplyFailed),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Warning => f.write_str("warning"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// One piece of raw diagnostic output supporting a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Which check produced this (e.g. `pod-status`, `terraform-plan`).
    pub source: String,
    /// Raw excerpt from the external tool, truncated at collection time.
    pub excerpt: String,
    pub captured_at: DateTime<Utc>,
}

impl Evidence {
    #[must_use]
    pub fn new(source: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            excerpt: excerpt.into(),
            captured_at: Utc::now(),
        }
    }
}

/// A structured observation about a target's state. Immutable once recorded:
/// the collector builds it, everything downstream only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub subject: Target,
    pub condition: Condition,
    /// Ordered raw diagnostic outputs backing the condition.
    pub evidence: Vec<Evidence>,
    pub severity: Severity,
    pub observed_at: DateTime<Utc>,
}

impl Finding {
    #[must_use]
    pub fn new(subject: Target, condition: Condition, severity: Severity) -> Self {
        Self {
            subject,
            condition,
            evidence: Vec::new(),
            severity,
            observed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    /// All evidence excerpts joined for pattern matching by triggers.
    #[must_use]
    pub fn evidence_text(&self) -> String {
        self.evidence
            .iter()
            .map(|e| e.excerpt.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_parse_aliases() {
        assert_eq!(
            Condition::parse("CrashLoopBackOff"),
            Some(Condition::CrashLoopBackOff)
        );
        assert_eq!(Condition::parse("drift"), Some(Condition::StateDrift));
        assert_eq!(Condition::parse("lock"), Some(Condition::StateLockHeld));
        assert_eq!(Condition::parse("nonsense"), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_evidence_text_joins_in_order() {
        let finding = Finding::new(
            Target::pod("payments", "api-1"),
            Condition::CrashLoopBackOff,
            Severity::Critical,
        )
        .with_evidence(Evidence::new("pod-status", "waiting: CrashLoopBackOff"))
        .with_evidence(Evidence::new("pod-status", "last exit code: 137"));

        let text = finding.evidence_text();
        let crash = text.find("CrashLoopBackOff").unwrap();
        let oom = text.find("137").unwrap();
        assert!(crash < oom);
    }
}
