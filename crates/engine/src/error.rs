//! Engine error types.
//!
//! Libraries in this workspace surface typed errors; the CLI wraps them with
//! `anyhow` context. Local recovery is limited to bounded retries of
//! idempotent, non-destructive steps - everything else propagates to the
//! operator with full context.

use thiserror::Error;

use crate::finding::Finding;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The external system was unreachable or a check could not run at all.
    /// Partial collection is NOT an error - it is reported per-check in the
    /// [`crate::collect::CollectionReport`].
    #[error("collection against {system} failed: {reason}")]
    Collection { system: String, reason: String },

    /// No procedure in the catalog matches the observed findings. The engine
    /// never guesses; this always escalates to a human.
    #[error("no catalog procedure matches {} finding(s) - escalating to operator", findings.len())]
    NoMatch { findings: Vec<Finding> },

    /// A destructive (or non-idempotent) step was reached and the operator
    /// declined or no confirmation was available.
    #[error("step '{step}' requires operator confirmation and none was granted")]
    ConfirmationRequired { step: String },

    /// A step ran but its success predicate did not hold.
    #[error("step '{step}' failed: expected {expected}, observed {observed}")]
    StepExecution {
        step: String,
        expected: String,
        observed: String,
    },

    /// The rollback procedure itself failed. Always fatal, never retried.
    #[error("rollback '{procedure}' failed at step '{step}': {reason}")]
    Rollback {
        procedure: String,
        step: String,
        reason: String,
    },

    /// A step command template could not be rendered (missing parameter,
    /// malformed template).
    #[error("template error in step '{step}': {reason}")]
    Template { step: String, reason: String },

    /// The referenced procedure does not exist in the catalog.
    #[error("unknown procedure '{id}'")]
    UnknownProcedure { id: String },

    /// The procedure defines no steps, so there is nothing to plan or run.
    #[error("procedure '{id}' has no steps")]
    EmptyProcedure { id: String },

    /// A target identifier could not be parsed.
    #[error("invalid target '{input}': {reason}")]
    InvalidTarget { input: String, reason: String },

    /// Audit log I/O or chain-integrity failure.
    #[error("audit log error: {0}")]
    Audit(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether this error must be escalated to a human rather than handled
    /// programmatically.
    #[must_use]
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::NoMatch { .. } | Self::Rollback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_is_escalation() {
        let err = Error::NoMatch { findings: vec![] };
        assert!(err.is_escalation());
        assert!(err.to_string().contains("escalating"));
    }

    #[test]
    fn test_rollback_is_escalation() {
        let err = Error::Rollback {
            procedure: "drain-node".to_string(),
            step: "uncordon".to_string(),
            reason: "exit 1".to_string(),
        };
        assert!(err.is_escalation());
    }

    #[test]
    fn test_step_execution_is_not_escalation() {
        let err = Error::StepExecution {
            step: "delete-pod".to_string(),
            expected: "exit code 0".to_string(),
            observed: "exit code 1".to_string(),
        };
        assert!(!err.is_escalation());
    }
}
