//! Terminal rendering of reports, plans, and audit entries.

use colored::Colorize;
use std::fmt::Write as _;

use mend_engine::audit::AuditEntry;
use mend_engine::collect::{CheckStatus, CollectionReport};
use mend_engine::decision::Candidate;
use mend_engine::{ExecutionRecord, Finding, Procedure, Severity};

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Info => "info".normal().to_string(),
        Severity::Warning => "warning".yellow().to_string(),
        Severity::Critical => "critical".red().bold().to_string(),
    }
}

fn write_finding(out: &mut String, finding: &Finding) {
    writeln!(
        out,
        "  [{}] {} on {}",
        severity_label(finding.severity),
        finding.condition.to_string().bold(),
        finding.subject
    )
    .unwrap();
    for evidence in &finding.evidence {
        writeln!(out, "      {} | {}", evidence.source.dimmed(), evidence.excerpt).unwrap();
    }
}

/// Render a collection report as text.
#[must_use]
pub fn collection_report(report: &CollectionReport) -> String {
    let mut out = String::new();

    writeln!(out, "=== Diagnosis: {} ===", report.target).unwrap();
    writeln!(out, "Collected: {}", report.collected_at).unwrap();
    writeln!(out).unwrap();

    writeln!(out, "Checks:").unwrap();
    for check in &report.checks {
        let status = match &check.status {
            CheckStatus::Passed => "ok".green().to_string(),
            CheckStatus::Failed { reason } => format!("{}: {reason}", "failed".red()),
            CheckStatus::TimedOut => "timed out".red().to_string(),
        };
        writeln!(out, "  - {}: {status}", check.check).unwrap();
    }
    if report.is_partial() {
        writeln!(
            out,
            "{}",
            "  (partial results: some checks failed, findings below may be incomplete)".yellow()
        )
        .unwrap();
    }
    writeln!(out).unwrap();

    if report.findings.is_empty() {
        writeln!(out, "{}", "No findings.".green()).unwrap();
    } else {
        writeln!(out, "Findings ({}):", report.findings.len()).unwrap();
        for finding in &report.findings {
            write_finding(&mut out, finding);
        }
    }

    out
}

/// Render the ranked remediation candidates.
#[must_use]
pub fn candidates(ranked: &[Candidate]) -> String {
    let mut out = String::new();
    writeln!(out, "Candidate procedures ({}):", ranked.len()).unwrap();
    for (i, candidate) in ranked.iter().enumerate() {
        let p = &candidate.procedure;
        writeln!(
            out,
            "  {}. {} v{} (specificity {}, {} destructive step(s))",
            i + 1,
            p.id.bold(),
            p.version,
            candidate.specificity,
            p.destructive_step_count()
        )
        .unwrap();
        writeln!(out, "     {}", p.description.dimmed()).unwrap();
        writeln!(
            out,
            "     matches: {} on {}",
            candidate.finding.condition,
            candidate.finding.subject
        )
        .unwrap();
    }
    out
}

/// Render one procedure with its steps, for `catalog show` and dry-run.
#[must_use]
pub fn procedure(p: &Procedure) -> String {
    let mut out = String::new();
    writeln!(out, "{} v{} - {}", p.id.bold(), p.version, p.name).unwrap();
    writeln!(out, "  {}", p.description).unwrap();
    writeln!(out, "  trigger: {}", p.trigger.condition).unwrap();
    if !p.required_params().is_empty() {
        writeln!(
            out,
            "  params:  {}",
            p.required_params().into_iter().collect::<Vec<_>>().join(", ")
        )
        .unwrap();
    }
    if let Some(rollback) = &p.rollback {
        writeln!(out, "  rollback: {rollback}").unwrap();
    }
    writeln!(out, "  steps:").unwrap();
    for (i, step) in p.steps.iter().enumerate() {
        let flags = match (step.destructive, step.idempotent) {
            (true, _) => "destructive".red().to_string(),
            (false, true) => "safe".green().to_string(),
            (false, false) => "mutating".yellow().to_string(),
        };
        writeln!(out, "    {}. {} [{flags}]", i + 1, step.name.bold()).unwrap();
        writeln!(out, "       {}", step.command.cyan()).unwrap();
        writeln!(out, "       effect: {}", step.predicted_effect).unwrap();
    }
    out
}

/// Render the outcome of an execution.
#[must_use]
pub fn execution_record(record: &ExecutionRecord) -> String {
    let mut out = String::new();
    let state = match record.state {
        mend_engine::ExecutionState::Succeeded => record.state.to_string().green().to_string(),
        mend_engine::ExecutionState::RolledBack => record.state.to_string().yellow().to_string(),
        _ => record.state.to_string().red().to_string(),
    };
    writeln!(
        out,
        "Execution {} of {} v{} on {}: {state}",
        record.id, record.procedure_id, record.procedure_version, record.target
    )
    .unwrap();
    for step in &record.steps {
        writeln!(
            out,
            "  - {}: {:?} ({} attempt(s)){}",
            step.step,
            step.state,
            step.attempts,
            step.output_summary
                .as_deref()
                .map(|s| format!(" - {s}"))
                .unwrap_or_default()
        )
        .unwrap();
    }
    out
}

/// Render an escalation notice for findings no procedure matched.
/// This is the end of the automated path; a human takes over.
#[must_use]
pub fn escalation(findings: &[Finding]) -> String {
    let mut out = String::new();
    writeln!(out, "{}", "=== ESCALATION REQUIRED ===".red().bold()).unwrap();
    writeln!(
        out,
        "No catalog procedure matches the observed findings. Manual"
    )
    .unwrap();
    writeln!(out, "investigation is required; nothing was changed.").unwrap();
    writeln!(out).unwrap();
    if findings.is_empty() {
        writeln!(out, "  (no findings were collected)").unwrap();
    }
    for finding in findings {
        write_finding(&mut out, finding);
    }
    out
}

/// Render audit entries for `audit tail`.
#[must_use]
pub fn audit_entries(entries: &[AuditEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let event = serde_json::to_value(&entry.event)
            .ok()
            .and_then(|v| v.get("event").and_then(|e| e.as_str()).map(ToString::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        writeln!(
            out,
            "{:>5}  {}  {:<22}  {}",
            entry.seq,
            entry.at.format("%Y-%m-%d %H:%M:%S"),
            event,
            entry.operator.dimmed()
        )
        .unwrap();
    }
    out
}
