//! Append-only audit log.
//!
//! Every finding, plan selection, confirmation, and step attempt is written
//! here before and after it takes effect, so a crash mid-execution leaves a
//! reconstructible trail. Entries are JSONL and carry a SHA-1 chain hash of
//! the previous line; `verify` detects any rewrite or truncation in the
//! middle of the file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::exec::ExecutionState;
use crate::finding::Finding;
use crate::target::Target;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000";

/// Outcome of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    Succeeded,
    Failed,
    Skipped,
}

/// Per-step record inside an [`ExecutionRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub state: StepState,
    pub rendered_command: String,
    /// Number of attempts actually made (1 unless retried).
    pub attempts: u32,
    /// Confirmation event id that authorized this step, when one was needed.
    /// Destructive steps always carry one; the invariant is enforced by the
    /// execution engine and checked again at record time.
    pub confirmation: Option<Uuid>,
    pub destructive: bool,
    pub output_summary: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// The append-only record of one procedure execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub procedure_id: String,
    pub procedure_version: u32,
    pub target: Target,
    pub params: BTreeMap<String, String>,
    pub operator: String,
    pub state: ExecutionState,
    pub steps: Vec<StepOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Invariant from the data model: a destructive step outcome that ran
    /// (i.e. was not skipped) must reference a confirmation event.
    #[must_use]
    pub fn destructive_steps_confirmed(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.destructive && s.state != StepState::Skipped)
            .all(|s| s.confirmation.is_some())
    }
}

/// Events the audit log records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    FindingRecorded {
        finding: Finding,
    },
    PlanSelected {
        execution_id: Uuid,
        procedure_id: String,
        procedure_version: u32,
        target: Target,
    },
    ConfirmationGranted {
        execution_id: Uuid,
        step: String,
        confirmation_id: Uuid,
    },
    ConfirmationDenied {
        execution_id: Uuid,
        step: String,
    },
    StepStarted {
        execution_id: Uuid,
        step: String,
        rendered_command: String,
        predicted_effect: String,
    },
    StepFinished {
        execution_id: Uuid,
        outcome: StepOutcome,
    },
    ExecutionFinished {
        record: ExecutionRecord,
    },
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub operator: String,
    pub prev_hash: String,
    pub hash: String,
    #[serde(flatten)]
    pub event: AuditEvent,
}

fn chain_hash(prev_hash: &str, seq: u64, at: DateTime<Utc>, operator: &str, event: &AuditEvent) -> Result<String> {
    #[derive(Serialize)]
    struct Payload<'a> {
        seq: u64,
        at: DateTime<Utc>,
        operator: &'a str,
        event: &'a AuditEvent,
    }

    let payload = serde_json::to_vec(&Payload {
        seq,
        at,
        operator,
        event,
    })?;

    let mut hasher = Sha1::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(&payload);
    Ok(hex::encode(hasher.finalize()))
}

/// Append-only JSONL sink. Opening an existing log resumes the hash chain
/// from its last line; nothing is ever rewritten.
pub struct AuditLog {
    path: PathBuf,
    last_hash: String,
    seq: u64,
}

impl AuditLog {
    /// Open (or create) the audit log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (last_hash, seq) = match File::open(&path) {
            Ok(file) => {
                let mut last_hash = GENESIS_HASH.to_string();
                let mut seq = 0;
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: AuditEntry = serde_json::from_str(&line)
                        .map_err(|e| Error::Audit(format!("corrupt entry: {e}")))?;
                    last_hash = entry.hash;
                    seq = entry.seq;
                }
                (last_hash, seq)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (GENESIS_HASH.to_string(), 0),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            last_hash,
            seq,
        })
    }

    /// Append one event. The line is flushed before this returns, so the
    /// trail survives a crash immediately after the recorded action.
    pub fn append(&mut self, operator: &str, event: AuditEvent) -> Result<AuditEntry> {
        let seq = self.seq + 1;
        let at = Utc::now();
        let hash = chain_hash(&self.last_hash, seq, at, operator, &event)?;

        let entry = AuditEntry {
            seq,
            at,
            operator: operator.to_string(),
            prev_hash: self.last_hash.clone(),
            hash: hash.clone(),
            event,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
        file.flush()?;

        self.last_hash = hash;
        self.seq = seq;
        Ok(entry)
    }

    /// Re-walk the whole chain and verify every hash. Returns the number of
    /// valid entries.
    pub fn verify(path: &Path) -> Result<usize> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut prev_hash = GENESIS_HASH.to_string();
        let mut expected_seq = 0u64;
        let mut count = 0;

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)
                .map_err(|e| Error::Audit(format!("corrupt entry at seq {}: {e}", expected_seq + 1)))?;

            expected_seq += 1;
            if entry.seq != expected_seq {
                return Err(Error::Audit(format!(
                    "sequence gap: expected {expected_seq}, found {}",
                    entry.seq
                )));
            }
            if entry.prev_hash != prev_hash {
                return Err(Error::Audit(format!(
                    "chain break at seq {}: prev_hash mismatch",
                    entry.seq
                )));
            }
            let recomputed =
                chain_hash(&prev_hash, entry.seq, entry.at, &entry.operator, &entry.event)?;
            if recomputed != entry.hash {
                return Err(Error::Audit(format!(
                    "hash mismatch at seq {}: entry was altered",
                    entry.seq
                )));
            }
            prev_hash = entry.hash;
            count += 1;
        }

        Ok(count)
    }

    /// Read the last `n` entries.
    pub fn tail(path: &Path, n: usize) -> Result<Vec<AuditEntry>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(
                serde_json::from_str(&line)
                    .map_err(|e| Error::Audit(format!("corrupt entry: {e}")))?,
            );
        }
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Condition, Severity};

    fn sample_finding() -> Finding {
        Finding::new(
            Target::pod("payments", "api-1"),
            Condition::CrashLoopBackOff,
            Severity::Critical,
        )
    }

    #[test]
    fn test_append_and_verify_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let mut log = AuditLog::open(&path).unwrap();
        for _ in 0..3 {
            log.append(
                "alice",
                AuditEvent::FindingRecorded {
                    finding: sample_finding(),
                },
            )
            .unwrap();
        }

        assert_eq!(AuditLog::verify(&path).unwrap(), 3);
    }

    #[test]
    fn test_reopen_resumes_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(
                "alice",
                AuditEvent::FindingRecorded {
                    finding: sample_finding(),
                },
            )
            .unwrap();
        }
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(
                "bob",
                AuditEvent::FindingRecorded {
                    finding: sample_finding(),
                },
            )
            .unwrap();
        }

        assert_eq!(AuditLog::verify(&path).unwrap(), 2);
        let entries = AuditLog::tail(&path, 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operator, "bob");
        assert_eq!(entries[0].seq, 2);
    }

    #[test]
    fn test_tampering_breaks_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let mut log = AuditLog::open(&path).unwrap();
        log.append(
            "alice",
            AuditEvent::FindingRecorded {
                finding: sample_finding(),
            },
        )
        .unwrap();
        log.append(
            "alice",
            AuditEvent::FindingRecorded {
                finding: sample_finding(),
            },
        )
        .unwrap();

        // Rewrite the first line's operator.
        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("alice", "mallory", 1);
        std::fs::write(&path, tampered).unwrap();

        let err = AuditLog::verify(&path).unwrap_err();
        assert!(matches!(err, Error::Audit(_)));
    }

    #[test]
    fn test_tail_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.jsonl");
        assert!(AuditLog::tail(&path, 10).unwrap().is_empty());
        assert_eq!(AuditLog::verify(&path).unwrap(), 0);
    }

    #[test]
    fn test_destructive_confirmation_invariant_check() {
        let mut record = ExecutionRecord {
            id: Uuid::new_v4(),
            procedure_id: "restart-pod".to_string(),
            procedure_version: 1,
            target: Target::pod("payments", "api-1"),
            params: BTreeMap::new(),
            operator: "alice".to_string(),
            state: ExecutionState::Succeeded,
            steps: vec![StepOutcome {
                step: "delete-pod".to_string(),
                state: StepState::Succeeded,
                rendered_command: "kubectl delete pod api-1 -n payments".to_string(),
                attempts: 1,
                confirmation: None,
                destructive: true,
                output_summary: None,
                started_at: Some(Utc::now()),
                finished_at: Some(Utc::now()),
            }],
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        };

        assert!(!record.destructive_steps_confirmed());
        record.steps[0].confirmation = Some(Uuid::new_v4());
        assert!(record.destructive_steps_confirmed());

        // Skipped destructive steps need no confirmation.
        record.steps[0].confirmation = None;
        record.steps[0].state = StepState::Skipped;
        assert!(record.destructive_steps_confirmed());
    }
}
