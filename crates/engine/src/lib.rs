//! Runbook automation engine.
//!
//! Turns the manual triage runbooks for a Kubernetes cluster and a Terraform
//! state store into software: read-only diagnostic collection, catalog-driven
//! remediation selection, and confirmed, audited execution. The external
//! systems are only ever touched through their own CLIs (`kubectl`,
//! `terraform`), which are treated as opaque collaborators behind the
//! [`runner::CommandRunner`] seam.

pub mod audit;
pub mod builtin;
pub mod catalog;
pub mod collect;
pub mod config;
pub mod decision;
pub mod error;
pub mod exec;
pub mod finding;
pub mod runner;
pub mod target;
pub mod template;

pub use audit::{AuditEntry, AuditEvent, AuditLog, ExecutionRecord};
pub use catalog::{Catalog, Procedure, Step, SuccessPredicate, Trigger};
pub use collect::{CheckStatus, CollectionReport, Collector};
pub use config::EngineConfig;
pub use decision::{Candidate, DecisionEngine};
pub use error::{Error, Result};
pub use exec::{ConfirmationGate, ExecutionRequest, ExecutionState, Executor};
pub use finding::{Condition, Evidence, Finding, Severity};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use target::Target;
