//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Tunables for collection and execution. Loaded from YAML when present,
/// otherwise the defaults below apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Working directory passed to terraform via `-chdir`.
    pub terraform_dir: String,
    /// Extra `--context` for kubectl, when operating on a non-default cluster.
    pub kubectl_context: Option<String>,
    /// Timeout for each read-only diagnostic check.
    pub check_timeout_secs: u64,
    /// Maximum automatic retries for idempotent, non-destructive steps.
    pub max_step_retries: u32,
    /// Base backoff between retries; doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Path of the append-only audit log.
    pub audit_path: PathBuf,
    /// Optional catalog overlay merged over the built-ins.
    pub catalog_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            terraform_dir: ".".to_string(),
            kubectl_context: None,
            check_timeout_secs: 30,
            max_step_retries: 2,
            retry_backoff_ms: 500,
            audit_path: PathBuf::from("mend-audit.jsonl"),
            catalog_path: None,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}
