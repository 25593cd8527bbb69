//! CLI command definitions for circuit-weaver.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::agents::{JobFactory, SharedResources, SuccessRecorder, CONCEPT_FILE, METRICS_FILE};
use crate::config::WeaverConfig;
use crate::knowledge::RecordOutcome;
use crate::llm::{BackendSet, LiteLlmClient};
use crate::metrics::{export_metrics, init_metrics};

/// Default number of concurrent jobs.
const DEFAULT_WORKERS: usize = 3;

/// Circuit diagram script factory.
#[derive(Parser)]
#[command(name = "circuit-weaver")]
#[command(about = "Generate, repair and collect circuit diagram scripts with racing LLM backends")]
#[command(version)]
#[command(
    long_about = "circuit-weaver runs jobs that ideate a circuit, generate a diagram script, execute it in a sandbox and repair it by racing several backends until one works.\n\nSuccessful scripts feed the creative store; resolved failures are mined into the corrective store.\n\nExample usage:\n  circuit-weaver run -n 10 -w 4 --config weaver.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the job factory.
    Run(RunArgs),

    /// Record existing scripts into the creative store.
    Seed(SeedArgs),

    /// Show knowledge store contents.
    Stores(StoresArgs),

    /// Print the metrics written by the last factory run.
    Metrics(MetricsArgs),
}

/// Arguments for `circuit-weaver run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of jobs to run (0 runs until interrupted).
    #[arg(short = 'n', long, default_value = "0")]
    pub num_jobs: usize,

    /// Number of jobs running at once.
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Override the maximum number of debug rounds per job.
    #[arg(long)]
    pub max_debug_rounds: Option<u32>,

    /// Override the results directory.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print the final report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `circuit-weaver seed`.
#[derive(Parser, Debug)]
pub struct SeedArgs {
    /// Directory with one sub-directory per example (script plus idea.txt).
    pub dir: PathBuf,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for `circuit-weaver stores`.
#[derive(Parser, Debug)]
pub struct StoresArgs {
    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of latest corrective records to show.
    #[arg(long, default_value = "5")]
    pub recent: usize,
}

/// Arguments for `circuit-weaver metrics`.
#[derive(Parser, Debug)]
pub struct MetricsArgs {
    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and execute the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_factory_command(args).await,
        Commands::Seed(args) => run_seed_command(args).await,
        Commands::Stores(args) => run_stores_command(args).await,
        Commands::Metrics(args) => run_metrics_command(args).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WeaverConfig> {
    WeaverConfig::load(path).with_context(|| match path {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })
}

// ============================================================================
// run
// ============================================================================

async fn run_factory_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(rounds) = args.max_debug_rounds {
        config.max_debug_rounds = rounds;
    }
    if let Some(output) = args.output {
        config.paths.results_dir = output;
    }
    let config = Arc::new(config);

    let client = LiteLlmClient::from_env().context("backend connection is not configured")?;
    info!(
        api_base = client.api_base(),
        model = client.default_model(),
        "Using LiteLLM backend"
    );
    let backends = BackendSet::from_config(&config.backends, Arc::new(client));

    let resources = SharedResources::initialize(Arc::clone(&config))
        .await
        .context("failed to initialize shared resources")?;
    let factory = JobFactory::new(resources, backends);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing running jobs");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = factory.run(args.num_jobs, args.workers, shutdown_rx).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Jobs dispatched: {}", report.dispatched);
        println!("  done:          {}", report.done);
        println!("  abandoned:     {}", report.abandoned);
        println!("Mined records:   {}", report.mined_records);
        if report.interrupted {
            println!("Stopped by interrupt");
        }
        if let Some(path) = &report.metrics_file {
            println!("Metrics:         {}", path.display());
        }
    }
    Ok(())
}

// ============================================================================
// seed
// ============================================================================

/// Result of seeding a directory.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct SeedSummary {
    pub recorded: usize,
    pub already_recorded: usize,
    pub skipped: Vec<String>,
}

async fn run_seed_command(args: SeedArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let resources = SharedResources::initialize(Arc::new(config.clone()))
        .await
        .context("failed to open knowledge stores")?;
    let recorder = SuccessRecorder::new(
        Arc::clone(resources.retriever.creative()),
        config.store_write_retries,
    );

    let summary = seed_directory(&recorder, &args.dir, config.script_extension()).await?;
    println!(
        "Seeded {} example(s), {} already present, {} skipped",
        summary.recorded,
        summary.already_recorded,
        summary.skipped.len()
    );
    for name in &summary.skipped {
        println!("  skipped: {}", name);
    }
    Ok(())
}

/// Record every `<dir>/<name>/` holding a `*.<extension>` script and an
/// `idea.txt` concept under job id `seed-<name>`.
pub async fn seed_directory(
    recorder: &SuccessRecorder,
    dir: &Path,
    extension: &str,
) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    let mut examples: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();
    examples.sort();

    for example in examples {
        let name = example
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let concept = match tokio::fs::read_to_string(example.join(CONCEPT_FILE)).await {
            Ok(concept) if !concept.trim().is_empty() => concept.trim().to_string(),
            _ => {
                warn!(example = %name, "No idea.txt, skipping");
                summary.skipped.push(name);
                continue;
            }
        };

        let Some(script_path) = find_script(&example, extension) else {
            warn!(example = %name, extension, "No script file, skipping");
            summary.skipped.push(name);
            continue;
        };
        let script = tokio::fs::read_to_string(&script_path)
            .await
            .with_context(|| format!("failed to read {}", script_path.display()))?;

        match recorder
            .record(&script, &concept, &format!("seed-{}", name))
            .await
        {
            Ok(RecordOutcome::Recorded(_)) => summary.recorded += 1,
            Ok(RecordOutcome::AlreadyRecorded { .. }) => summary.already_recorded += 1,
            Err(e) => {
                warn!(example = %name, error = %e, "Failed to seed example");
                summary.skipped.push(name);
            }
        }
    }

    Ok(summary)
}

fn find_script(dir: &Path, extension: &str) -> Option<PathBuf> {
    let mut scripts: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
        .collect();
    scripts.sort();
    scripts.into_iter().next()
}

// ============================================================================
// stores / metrics
// ============================================================================

async fn run_stores_command(args: StoresArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let resources = SharedResources::initialize(Arc::new(config))
        .await
        .context("failed to open knowledge stores")?;
    let corrective = resources.retriever.corrective();
    let creative = resources.retriever.creative();

    println!("Creative store:   {} script(s)", creative.len().await);
    println!("Corrective store: {} record(s)", corrective.len().await);

    let recent = corrective.recent(args.recent).await;
    if !recent.is_empty() {
        println!();
        println!("Latest corrective records:");
        for record in recent {
            println!(
                "  #{} [{}] {}\n      -> {}",
                record.id, record.source_job, record.error_pattern, record.solution
            );
        }
    }
    Ok(())
}

async fn run_metrics_command(args: MetricsArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let path = config.paths.results_dir.join(METRICS_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => print!("{}", text),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "No metrics from a previous run");
            init_metrics().context("failed to initialize metrics")?;
            print!("{}", export_metrics());
        }
    }
    Ok(())
}
