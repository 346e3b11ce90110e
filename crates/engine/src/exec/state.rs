//! Execution lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one procedure execution.
///
/// `Planned -> AwaitingConfirmation -> Running -> {Succeeded, Failed, RolledBack}`
///
/// `AwaitingConfirmation` recurs before every step that is not safe to
/// auto-run; `Running` and `AwaitingConfirmation` may alternate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Steps rendered, nothing executed yet.
    Planned,
    /// Blocked on an operator confirmation.
    AwaitingConfirmation,
    /// A step is executing.
    Running,
    /// All steps succeeded.
    Succeeded,
    /// A step failed (or confirmation was denied); later steps were skipped.
    Failed,
    /// A step failed and the rollback procedure completed.
    RolledBack,
}

impl ExecutionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::RolledBack)
    }

    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        match self {
            Self::Planned => matches!(
                next,
                Self::AwaitingConfirmation | Self::Running | Self::Failed
            ),
            Self::AwaitingConfirmation => matches!(next, Self::Running | Self::Failed),
            Self::Running => matches!(
                next,
                Self::AwaitingConfirmation | Self::Succeeded | Self::Failed
            ),
            // Failed may still move to RolledBack when a rollback is offered
            // and completes.
            Self::Failed => matches!(next, Self::RolledBack),
            Self::Succeeded | Self::RolledBack => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::AwaitingConfirmation => "awaiting-confirmation",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(ExecutionState::Planned.can_transition(ExecutionState::AwaitingConfirmation));
        assert!(ExecutionState::AwaitingConfirmation.can_transition(ExecutionState::Running));
        assert!(ExecutionState::Running.can_transition(ExecutionState::Succeeded));
    }

    #[test]
    fn test_safe_steps_skip_confirmation() {
        assert!(ExecutionState::Planned.can_transition(ExecutionState::Running));
        assert!(ExecutionState::Running.can_transition(ExecutionState::AwaitingConfirmation));
    }

    #[test]
    fn test_failed_may_roll_back() {
        assert!(ExecutionState::Failed.can_transition(ExecutionState::RolledBack));
        assert!(!ExecutionState::Failed.can_transition(ExecutionState::Running));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for state in [ExecutionState::Succeeded, ExecutionState::RolledBack] {
            assert!(state.is_terminal());
            for next in [
                ExecutionState::Planned,
                ExecutionState::Running,
                ExecutionState::Failed,
            ] {
                assert!(!state.can_transition(next));
            }
        }
        // Failed is terminal for execution but still admits the rollback edge.
        assert!(ExecutionState::Failed.is_terminal());
    }
}
