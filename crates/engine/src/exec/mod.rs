//! Procedure execution: state machine, per-target serialization, and the
//! confirmation-gated engine.

mod engine;
mod locks;
mod state;

pub use engine::{ConfirmationGate, ExecutionRequest, Executor, StepPreview};
pub use locks::TargetLocks;
pub use state::ExecutionState;
