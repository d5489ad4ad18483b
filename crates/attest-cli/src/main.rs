//! Attest - Continuous Compliance Validation CLI
//!
//! The `attest` command validates a system's declared security controls
//! against stored evidence and projects versioned compliance artifacts.
//!
//! ## Commands
//!
//! - `validate`: Run a full validation and write the artifact set
//! - `ingest`: Store one evidence item and link it to a control
//! - `history`: Show the append-only validation record of a control
//! - `snapshot`: Show a committed snapshot with its drift

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use attest_core::{builtin_checks, CheckRegistry, SystemModel};
use attest_engine::{EngineConfig, LogNotifier, ValidationPipeline};
use attest_store::{
    AggregatedSnapshot, ControlId, EvidenceStore, FsEvidenceStore, FsValidationLedger, KsiStatus,
    RunScope, ValidationLedger,
};

#[derive(Parser)]
#[command(name = "attest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Continuous compliance validation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output and JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full validation and project the compliance artifact set
    Validate {
        /// Path to the system model (JSON control list)
        #[arg(short, long)]
        model: PathBuf,

        /// Evidence store and ledger root (default: .attest)
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Output directory for projected artifacts (default: .attest/artifacts)
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Evidence older than this many days forces a control to partial
        #[arg(long, default_value = "365")]
        freshness_days: i64,

        /// Per-check timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,

        /// Maximum control groups evaluated concurrently
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Store one evidence item and link it to a control
    Ingest {
        /// Path to the system model (JSON control list)
        #[arg(short, long)]
        model: PathBuf,

        /// Control the evidence supports
        #[arg(short, long)]
        control: String,

        /// Path to the evidence payload
        #[arg(short, long)]
        file: PathBuf,

        /// What the payload demonstrates
        #[arg(short, long)]
        description: String,

        /// Source URI (default: file://<path>)
        #[arg(long)]
        source: Option<String>,

        /// Evidence store and ledger root (default: .attest)
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// Show the append-only validation record of a control
    History {
        /// Control to show history for
        #[arg(short, long)]
        control: String,

        /// Evidence store and ledger root (default: .attest)
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// Show the latest (or a specific) committed snapshot with its drift
    Snapshot {
        /// Snapshot revision (default: latest)
        #[arg(long)]
        revision: Option<u64>,

        /// Evidence store and ledger root (default: .attest)
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    attest_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate {
            model,
            store_dir,
            artifacts_dir,
            freshness_days,
            timeout_secs,
            jobs,
        } => {
            let store_dir = resolve_store_dir(store_dir);
            let artifacts_dir = artifacts_dir.unwrap_or_else(|| store_dir.join("artifacts"));
            let mut config = EngineConfig::default()
                .with_evidence_freshness(Duration::days(freshness_days))
                .with_check_timeout(std::time::Duration::from_secs(timeout_secs));
            if let Some(jobs) = jobs {
                config = config.with_max_concurrency(jobs);
            }
            cmd_validate(&model, &store_dir, &artifacts_dir, config, cli.json).await
        }
        Commands::Ingest {
            model,
            control,
            file,
            description,
            source,
            store_dir,
        } => {
            cmd_ingest(
                &model,
                &resolve_store_dir(store_dir),
                &control,
                &file,
                &description,
                source.as_deref(),
            )
            .await
        }
        Commands::History { control, store_dir } => {
            cmd_history(&resolve_store_dir(store_dir), &control, cli.json).await
        }
        Commands::Snapshot {
            revision,
            store_dir,
        } => cmd_snapshot(&resolve_store_dir(store_dir), revision, cli.json).await,
    }
}

fn resolve_store_dir(store_dir: Option<PathBuf>) -> PathBuf {
    store_dir.unwrap_or_else(|| PathBuf::from(".attest"))
}

/// Build a pipeline over the filesystem backends with the builtin KSIs
/// registered for every declared control.
///
/// The model file declares controls; evidence links live in the store, so
/// they are rehydrated from the store's `supports` metadata on load.
async fn open_pipeline(
    model_path: &Path,
    store_dir: &Path,
    config: EngineConfig,
) -> Result<ValidationPipeline> {
    let mut model = SystemModel::load(model_path)
        .with_context(|| format!("failed to load system model: {:?}", model_path))?;

    let store = Arc::new(FsEvidenceStore::new(store_dir.join("evidence"))?);
    let ledger = Arc::new(FsValidationLedger::new(store_dir.join("ledger"))?);

    let control_ids: Vec<ControlId> = model.controls().map(|c| c.id.clone()).collect();
    for control_id in &control_ids {
        for evidence in store.linked_to(control_id).await? {
            model.link_evidence(control_id, evidence.id)?;
        }
    }

    let mut registry = CheckRegistry::new();
    for check in builtin_checks(control_ids, config.evidence_freshness) {
        registry.register(check)?;
    }

    Ok(ValidationPipeline::new(
        model,
        store,
        ledger,
        Arc::new(registry),
        Arc::new(LogNotifier::new()),
        config,
    ))
}

/// Run a full validation, commit the snapshot and write the artifact set.
async fn cmd_validate(
    model_path: &Path,
    store_dir: &Path,
    artifacts_dir: &Path,
    config: EngineConfig,
    json: bool,
) -> Result<()> {
    let pipeline = open_pipeline(model_path, store_dir, config).await?;

    let snapshot = pipeline.run_validation(RunScope::Full).await?;
    let artifacts = pipeline.project_latest().await?;
    let written = attest_core::write_artifact_set(artifacts_dir, &artifacts)?;

    info!(
        revision = snapshot.revision,
        artifacts = %written.display(),
        "validation committed"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&artifacts.system_id, &snapshot);
        println!();
        println!("Artifacts: {}", written.display());
    }

    let failed = snapshot.count_with(KsiStatus::Fail);
    if failed > 0 {
        anyhow::bail!("validation failed: {} control(s) validated false", failed);
    }
    Ok(())
}

/// Store one evidence payload and link it to a control.
async fn cmd_ingest(
    model_path: &Path,
    store_dir: &Path,
    control: &str,
    file: &Path,
    description: &str,
    source: Option<&str>,
) -> Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("failed to read evidence file: {:?}", file))?;
    let source_uri = source
        .map(String::from)
        .unwrap_or_else(|| format!("file://{}", file.display()));

    let pipeline = open_pipeline(model_path, store_dir, EngineConfig::default()).await?;
    let evidence_id = pipeline
        .ingest_evidence(content, ControlId::from(control), description, source_uri)
        .await?;

    println!("Stored evidence {} for {}", evidence_id.short(), control);
    println!("Evidence ID: {}", evidence_id);
    Ok(())
}

/// Print the append-only validation record of one control, oldest first.
async fn cmd_history(store_dir: &Path, control: &str, json: bool) -> Result<()> {
    let ledger = FsValidationLedger::new(store_dir.join("ledger"))?;
    let history = ledger.history(&ControlId::from(control)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No validation history for '{}'", control);
        return Ok(());
    }

    for entry in history {
        println!(
            "[{}] rev {} {} {} ({}) {}",
            entry.seq,
            entry.revision,
            entry.result.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.result.status,
            entry.result.check_id,
            entry.result.message.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

/// Show a committed snapshot with its drift delta.
async fn cmd_snapshot(store_dir: &Path, revision: Option<u64>, json: bool) -> Result<()> {
    let ledger = FsValidationLedger::new(store_dir.join("ledger"))?;
    let snapshot = match revision {
        Some(revision) => ledger.snapshot_at(revision).await?,
        None => match ledger.latest_snapshot().await? {
            Some(snapshot) => snapshot,
            None => {
                println!("No committed snapshot yet. Run 'attest validate' first.");
                return Ok(());
            }
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot("snapshot", &snapshot);
    }
    Ok(())
}

fn print_snapshot(heading: &str, snapshot: &AggregatedSnapshot) {
    println!(
        "{} revision {} ({})",
        heading,
        snapshot.revision,
        snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    for (control_id, entry) in &snapshot.statuses {
        if entry.diagnostics.is_empty() {
            println!("  {:<16} {}", control_id.as_str(), entry.status);
        } else {
            println!(
                "  {:<16} {:<8} {}",
                control_id.as_str(),
                entry.status.as_str(),
                entry.diagnostics.join("; ")
            );
        }
    }

    if !snapshot.drift.is_empty() {
        println!();
        println!("Drift ({} entries):", snapshot.drift.len());
        for entry in &snapshot.drift {
            println!("  {} {}", entry.kind(), entry.control_id());
        }
    }

    println!();
    println!(
        "Summary: {} true / {} false / {} partial / {} unknown",
        snapshot.count_with(KsiStatus::Pass),
        snapshot.count_with(KsiStatus::Fail),
        snapshot.count_with(KsiStatus::Partial),
        snapshot.count_with(KsiStatus::Unknown),
    );
}
