//! lidarpipe - batch LiDAR tile processing.
//!
//! Usage:
//!   lidarpipe run --config lidarpipe.yaml --jobs 24
//!   lidarpipe run --manifest tiles.csv --metrics-output metrics.json
//!   lidarpipe plan --manifest tiles.csv

use clap::{Args, Parser, Subcommand};
use lidarpipe_runner::metrics::describe_metrics;
use lidarpipe_runner::metrics_export::{InMemoryRecorder, MetricsExport};
use lidarpipe_runner::{
    plan, CancellationToken, CleanupPolicy, PipelineRunner, ProcessRunner, Profile, RunError,
    RunnerConfig, TileJob, TilePipeline,
};
use lidarpipe_tiles::{ArtifactKind, ArtifactStore, HttpFetcher, TileManifest};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for errors that stop the run before any tile starts.
const SETUP_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "lidarpipe")]
#[command(author, version, about = "Batch LiDAR tile processing", long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every tile of the manifest
    Run(RunArgs),
    /// Show identities, bounds and output paths without running anything
    Plan(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Manifest file, one locator per line
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Number of tiles processed at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Root of the artifact directories
    #[arg(long)]
    root: Option<PathBuf>,

    /// Source tile kind
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// When intermediate artifacts are deleted
    #[arg(long, value_enum)]
    cleanup: Option<CleanupPolicy>,

    /// Write a JSON metrics summary here when the run ends ("-" for stdout)
    #[arg(long, value_name = "PATH")]
    metrics_output: Option<PathBuf>,
}

impl RunArgs {
    /// Load the config file, if any, and apply flag overrides.
    fn resolve(&self) -> Result<RunnerConfig, RunError> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::load(path)?,
            None => RunnerConfig::default(),
        };
        if let Some(manifest) = &self.manifest {
            config.manifest = manifest.clone();
        }
        if let Some(jobs) = self.jobs {
            config.concurrency = jobs;
        }
        if let Some(root) = &self.root {
            config.layout.root = root.clone();
        }
        if let Some(profile) = self.profile {
            config.profile = profile;
        }
        if let Some(cleanup) = self.cleanup {
            config.cleanup = cleanup;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match &cli.command {
        Commands::Run(args) => run(args),
        Commands::Plan(args) => show_plan(args),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(SETUP_FAILURE)
        }
    }
}

fn load_jobs(config: &RunnerConfig) -> Result<Vec<TileJob>, RunError> {
    let manifest = TileManifest::load(&config.manifest)?;
    info!("Manifest {}: {} entries", config.manifest.display(), manifest.len());
    plan(&manifest, &config.resolved_naming())
}

/// Install an in-memory recorder as the global recorder.
fn install_recorder() -> InMemoryRecorder {
    let recorder = InMemoryRecorder::new();
    if metrics::set_global_recorder(recorder.clone()).is_err() {
        warn!("A metrics recorder is already installed; the summary will be empty");
    }
    recorder
}

fn write_metrics(path: &Path, export: &MetricsExport) {
    let json = match export.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Cannot serialize metrics: {}", e);
            return;
        }
    };
    if path == Path::new("-") {
        println!("{}", json);
    } else if let Err(e) = fs::write(path, json) {
        error!("Cannot write metrics to {}: {}", path.display(), e);
    } else {
        info!("Metrics written to {}", path.display());
    }
}

fn run(args: &RunArgs) -> Result<u8, RunError> {
    let recorder = args.metrics_output.as_ref().map(|_| install_recorder());
    describe_metrics();

    let config = args.resolve()?;
    let jobs = load_jobs(&config)?;
    let store = ArtifactStore::open(&config.layout)?;

    let fetcher = HttpFetcher::new(&config.fetch)?;
    let pipeline = TilePipeline::new(
        config.profile,
        store,
        Arc::new(ProcessRunner::new()),
        Arc::new(fetcher),
    )
    .with_naming(config.resolved_naming())
    .with_tool_settings(config.tools.clone())
    .with_cleanup(config.cleanup);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupted; finishing running stages, no new stages will start");
        handler_token.cancel();
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let report = PipelineRunner::new(config.concurrency).run(&pipeline, jobs, &cancel);
    report.log_summary();
    if let (Some(path), Some(recorder)) = (&args.metrics_output, &recorder) {
        write_metrics(path, &recorder.export());
    }
    Ok(report.exit_code())
}

fn show_plan(args: &RunArgs) -> Result<u8, RunError> {
    let config = args.resolve()?;
    let jobs = load_jobs(&config)?;
    let naming = config.resolved_naming();
    let outputs: Vec<ArtifactKind> = config
        .profile
        .stages()
        .iter()
        .map(|s| s.output())
        .filter(|k| !config.profile.intermediates().contains(k))
        .collect();

    let mut malformed = 0;
    for job in &jobs {
        match naming.describe(&job.locator) {
            Ok(tile) => {
                println!("{}\t{}\t{}", tile.identity, tile.bounds, job.locator);
                for kind in &outputs {
                    let name = if kind.keeps_source_name() {
                        tile.file_name.clone()
                    } else {
                        kind.file_name(&tile.identity)
                    };
                    let path = config.layout.directory(kind.dir()).join(name);
                    println!("\t{}\t{}", kind, path.display());
                }
            }
            Err(e) => {
                malformed += 1;
                println!("-\t-\t{}\t({})", job.locator, e);
            }
        }
    }
    info!("{} tiles planned, {} malformed", jobs.len(), malformed);
    Ok(if malformed == 0 { 0 } else { 1 })
}
