//! mendctl: operator CLI for the runbook automation engine.
//!
//! Diagnoses a target (pod, node, deployment, or terraform workspace),
//! plans a remediation from the catalog, and applies it with interactive
//! confirmation for anything destructive. Exit codes: 0 success, 1 error,
//! 2 escalation (no automated remedy, a human has to take over).

mod gate;
mod output;
mod params;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mend_engine::builtin::builtin_catalog;
use mend_engine::{
    AuditEvent, AuditLog, Catalog, Collector, Condition, DecisionEngine, EngineConfig,
    ExecutionRequest, Executor, Procedure, SystemRunner, Target,
};

use gate::PromptGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "mendctl", version, about = "Runbook automation for cluster and state triage")]
struct Cli {
    /// Config file (YAML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Operator identity recorded in the audit trail. Falls back to $USER.
    #[arg(long, global = true)]
    operator: Option<String>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Verbose logging (same as RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run read-only diagnostic checks against a target.
    Diagnose {
        /// Target: pod/<ns>/<name>, node/<name>, deployment/<ns>/<name>,
        /// or tf:<workspace>[:<address>].
        target: String,

        /// Narrow collection to these suspected conditions. Repeatable.
        #[arg(long = "hypothesis", value_name = "CONDITION")]
        hypotheses: Vec<String>,
    },

    /// Diagnose and show the ranked remediation candidates without running.
    Plan { target: String },

    /// Diagnose, select a procedure, and execute it with confirmation.
    Apply {
        target: String,

        /// Run this procedure instead of the decision engine's best match.
        #[arg(long)]
        procedure: Option<String>,

        /// Override an inferred parameter, as key=value. Repeatable.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Auto-approve safe (idempotent, non-destructive) steps.
        /// Destructive steps always prompt.
        #[arg(long)]
        yes_safe: bool,
    },

    /// Inspect the procedure catalog.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Inspect or verify the audit log.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// List all procedures.
    List,
    /// Show one procedure with its steps.
    Show { id: String },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Show the most recent audit entries.
    Tail {
        #[arg(long, default_value_t = 20)]
        count: usize,
    },
    /// Re-walk the hash chain and report whether the log is intact.
    Verify,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            if let Some(engine_err) = e.downcast_ref::<mend_engine::Error>() {
                if engine_err.is_escalation() {
                    if let mend_engine::Error::NoMatch { findings } = engine_err {
                        eprintln!("{}", output::escalation(findings));
                    } else {
                        eprintln!("{} {engine_err}", "ESCALATION:".red().bold());
                    }
                    std::process::exit(2);
                }
            }
            eprintln!("{} {e:#}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "mendctl=debug,mend_engine=debug"
    } else {
        "mendctl=info,mend_engine=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let operator = resolve_operator(cli.operator);
    let catalog = load_catalog(&config)?;

    match cli.command {
        Command::Diagnose { target, hypotheses } => {
            let target: Target = target.parse()?;
            let hypotheses = parse_hypotheses(&hypotheses)?;
            let report = collect(&config, &target, &hypotheses, &operator).await?;

            match cli.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Format::Text => print!("{}", output::collection_report(&report)),
            }
        }

        Command::Plan { target } => {
            let target: Target = target.parse()?;
            let report = collect(&config, &target, &[], &operator).await?;
            let engine = DecisionEngine::new(&catalog);
            let ranked = engine.decide(&report.findings)?;

            match cli.format {
                Format::Json => {
                    let value: Vec<_> = ranked
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "procedure": c.procedure,
                                "finding": c.finding,
                                "specificity": c.specificity,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                Format::Text => {
                    print!("{}", output::collection_report(&report));
                    println!();
                    print!("{}", output::candidates(&ranked));
                    println!();
                    println!("Best candidate:");
                    print!("{}", output::procedure(&ranked[0].procedure));
                }
            }
        }

        Command::Apply {
            target,
            procedure,
            params: param_args,
            yes_safe,
        } => {
            let target: Target = target.parse()?;
            let report = collect(&config, &target, &[], &operator).await?;

            let selected = match procedure {
                Some(id) => catalog.get(&id)?.clone(),
                None => {
                    let engine = DecisionEngine::new(&catalog);
                    engine.best(&report.findings)?.procedure
                }
            };
            let rollback = resolve_rollback(&catalog, &selected)?;

            let mut params = params::default_params(&target, &config, &report.findings);
            for raw in &param_args {
                let (key, value) = parse_param(raw)?;
                params.insert(key, value);
            }
            debug!(procedure = %selected.id, ?params, "resolved parameters");

            if cli.format == Format::Text {
                println!("Applying:");
                print!("{}", output::procedure(&selected));
                println!();
            }

            let audit = AuditLog::open(&config.audit_path)?;
            let executor = Executor::new(
                Arc::new(SystemRunner),
                Arc::new(PromptGate::new(yes_safe)),
                audit,
                config.clone(),
            );
            let record = executor
                .execute(ExecutionRequest {
                    procedure: selected,
                    rollback,
                    target,
                    params,
                    operator,
                })
                .await?;

            match cli.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&record)?),
                Format::Text => print!("{}", output::execution_record(&record)),
            }
        }

        Command::Catalog { action } => match action {
            CatalogAction::List => match cli.format {
                Format::Json => {
                    let all: Vec<&Procedure> = catalog.iter().collect();
                    println!("{}", serde_json::to_string_pretty(&all)?);
                }
                Format::Text => {
                    println!("Catalog ({} procedures):", catalog.len());
                    for p in catalog.iter() {
                        println!(
                            "  {: <28} v{: <3} on {: <20} {}",
                            p.id.bold(),
                            p.version,
                            p.trigger.condition.to_string(),
                            p.name
                        );
                    }
                }
            },
            CatalogAction::Show { id } => {
                let p = catalog.get(&id)?;
                match cli.format {
                    Format::Json => println!("{}", serde_json::to_string_pretty(p)?),
                    Format::Text => print!("{}", output::procedure(p)),
                }
            }
        },

        Command::Audit { action } => match action {
            AuditAction::Tail { count } => {
                let entries = AuditLog::tail(&config.audit_path, count)?;
                match cli.format {
                    Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                    Format::Text => print!("{}", output::audit_entries(&entries)),
                }
            }
            AuditAction::Verify => {
                let count = AuditLog::verify(&config.audit_path)?;
                println!(
                    "{} {count} entries, chain intact",
                    "verified:".green().bold()
                );
            }
        },
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p)
            .with_context(|| format!("failed to load config from {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Operator identity for the audit trail: the flag wins, then $USER.
fn resolve_operator(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Built-ins, with the configured overlay merged over them.
fn load_catalog(config: &EngineConfig) -> Result<Catalog> {
    let mut catalog = builtin_catalog();
    if let Some(path) = &config.catalog_path {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog overlay {}", path.display()))?;
        let merged = catalog.merge_yaml(&raw)?;
        debug!(merged, path = %path.display(), "merged catalog overlay");
    }
    Ok(catalog)
}

/// Resolve the rollback procedure named by `procedure`, if any.
fn resolve_rollback(catalog: &Catalog, procedure: &Procedure) -> Result<Option<Procedure>> {
    match &procedure.rollback {
        Some(id) => Ok(Some(catalog.get(id)?.clone())),
        None => Ok(None),
    }
}

fn parse_hypotheses(raw: &[String]) -> Result<Vec<Condition>> {
    raw.iter()
        .map(|h| {
            Condition::parse(h).ok_or_else(|| anyhow::anyhow!("unknown condition '{h}'"))
        })
        .collect()
}

fn parse_param(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("invalid --param '{raw}', expected key=value"),
    }
}

/// Run collection and write every finding to the audit trail before anything
/// else looks at it.
async fn collect(
    config: &EngineConfig,
    target: &Target,
    hypotheses: &[Condition],
    operator: &str,
) -> Result<mend_engine::collect::CollectionReport> {
    let collector = Collector::new(Arc::new(SystemRunner), config.clone());
    let report = collector.collect(target, hypotheses).await?;

    let mut audit = AuditLog::open(&config.audit_path)?;
    for finding in &report.findings {
        audit.append(
            operator,
            AuditEvent::FindingRecorded {
                finding: finding.clone(),
            },
        )?;
    }

    Ok(report)
}
