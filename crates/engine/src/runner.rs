//! Command execution seam for the external CLIs.
//!
//! Everything the engine does to the outside world goes through
//! [`CommandRunner`], so tests can substitute a mock and nothing else in the
//! crate ever spawns a process directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// A fully-resolved command to invoke against an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    /// Split a rendered command line into a spec. Step templates render to a
    /// single line with whitespace-separated arguments; quoting is not
    /// supported, matching the command shapes in the source runbooks.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(ToString::to_string);
        let program = parts.next().ok_or_else(|| Error::Template {
            step: String::new(),
            reason: "rendered command is empty".to_string(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short single-line summary for audit records and error messages.
    #[must_use]
    pub fn summary(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        let first = text.lines().next().unwrap_or_default();
        let mut excerpt: String = first.chars().take(200).collect();
        if first.chars().count() > 200 {
            excerpt.push_str("...");
        }
        format!("exit code {}: {excerpt}", self.exit_code)
    }
}

/// Seam over process execution.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and capture its output. Implementations
    /// do not apply timeouts; callers wrap invocations with their own.
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput>;
}

/// Real runner over `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        debug!("running: {spec}");

        let output = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Collection {
                system: spec.program.clone(),
                reason: format!("failed to spawn: {e}"),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_parse() {
        let spec = CommandSpec::parse("kubectl get pod api-1 -n payments -o json").unwrap();
        assert_eq!(spec.program, "kubectl");
        assert_eq!(spec.args.len(), 6);
        assert_eq!(spec.to_string(), "kubectl get pod api-1 -n payments -o json");
    }

    #[test]
    fn test_command_spec_parse_empty_fails() {
        assert!(CommandSpec::parse("   ").is_err());
    }

    #[test]
    fn test_output_summary_prefers_stderr() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: "partial".to_string(),
            stderr: "Error acquiring the state lock\nmore".to_string(),
        };
        let summary = output.summary();
        assert!(summary.starts_with("exit code 1"));
        assert!(summary.contains("state lock"));
        assert!(!summary.contains("more"));
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary_is_collection_error() {
        let runner = SystemRunner;
        let err = runner
            .run(CommandSpec::new("definitely-not-a-real-binary-4451", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Collection { .. }));
    }
}
