//! Asset Mirror - Main entry point
//!
//! Diffs two manifests and mirrors the new assets.

use anyhow::{Context, Result};
use asset_mirror::{
    config::Config,
    daemon::shutdown::ShutdownCoordinator,
    executor::extract::{CommandExtractor, ConfiguredExtractor, NoopExtractor},
    executor::{SyncExecutor, SyncJob},
    fs::walker::collect_matching,
    resources::SystemMonitor,
    transfer::{HttpFetcher, RetryPolicy},
    utils,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Previously mirrored manifest (omit to mirror everything)
    #[arg(short, long, value_name = "FILE")]
    baseline: Option<PathBuf>,

    /// Newly published manifest, or a directory holding it
    #[arg(short = 'n', long, value_name = "FILE")]
    candidate: Option<PathBuf>,

    /// Remote base URL (overrides config)
    #[arg(short = 'u', long)]
    base_url: Option<String>,

    /// Output directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Fixed worker count instead of load-based sizing
    #[arg(short, long)]
    workers: Option<usize>,

    /// Only mirror entries dated on or after this day (YYYYMMDD)
    #[arg(long)]
    start: Option<String>,

    /// Only mirror entries dated on or before this day (YYYYMMDD)
    #[arg(long)]
    end: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy every file whose name contains NEEDLE into one flat folder.
    ///
    /// Files already present in the target are left alone.
    Collect {
        /// Substring to look for in file names
        needle: String,

        /// Folder receiving the copies
        #[arg(short, long, value_name = "DIR")]
        target: PathBuf,

        /// Tree to search (defaults to the download output directory)
        #[arg(short, long, value_name = "DIR")]
        source: Option<PathBuf>,
    },
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(baseline) = &self.baseline {
            config.manifest.baseline = Some(baseline.clone());
        }
        if let Some(candidate) = &self.candidate {
            config.manifest.candidate = Some(candidate.clone());
        }
        if let Some(base_url) = &self.base_url {
            config.remote.base_url = base_url.clone();
        }
        if let Some(output) = &self.output {
            config.download.output_dir = output.clone();
        }
        if let Some(workers) = self.workers {
            config.download.workers = Some(workers);
        }
        if let Some(start) = &self.start {
            config.filter.start = Some(start.clone());
        }
        if let Some(end) = &self.end {
            config.filter.end = Some(end.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    // Initialize logging
    utils::logger::init(&config.log.level)?;

    if let Some(Command::Collect { needle, target, source }) = args.command {
        let source = source.unwrap_or_else(|| config.download.output_dir.clone());
        tracing::info!("Collecting files matching '{}' from {}", needle, source.display());
        let stats = tokio::task::spawn_blocking(move || collect_matching(&source, &target, &needle))
            .await
            .context("collect task failed")??;
        println!("{} copied, {} already present", stats.copied, stats.skipped);
        return Ok(ExitCode::SUCCESS);
    }

    config.validate()?;
    let job = SyncJob::from_config(&config)?;

    tracing::info!(
        "Starting asset-mirror v{} (output: {})",
        env!("CARGO_PKG_VERSION"),
        job.output_dir.display()
    );

    let fetcher = HttpFetcher::new(
        Duration::from_secs(config.remote.timeout_secs),
        &config.remote.user_agent,
    )?;
    let monitor = SystemMonitor::new(Duration::from_millis(config.download.sample_interval_ms));
    let extractor = match &config.extract.command {
        Some(program) => ConfiguredExtractor::Command(CommandExtractor::new(
            program.clone(),
            config.extract.args.clone(),
            config.extract_output_dir(),
        )),
        None => ConfiguredExtractor::Noop(NoopExtractor),
    };

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();
    let signal_watch = {
        let coordinator = shutdown_coordinator.clone();
        tokio::spawn(async move { coordinator.wait_for_signal().await })
    };

    let executor = SyncExecutor::new(fetcher, monitor, extractor, config.download.workers)
        .with_policy(RetryPolicy {
            max_attempts: config.download.max_attempts,
            delay: Duration::from_secs(config.download.retry_delay_secs),
        })
        .with_progress_interval(Duration::from_secs(config.download.progress_interval_secs.max(1)))
        .with_cancel(shutdown_coordinator.token());

    let result = executor.run(&job).await;

    // Stop listening for signals
    signal_watch.abort();

    let summary = result?;

    println!(
        "Run {}: {} succeeded ({} already present), {} failed, {} extracted in {}s",
        summary.run_id,
        summary.report.success_count,
        summary.report.skipped_count,
        summary.report.failed_count,
        summary.extraction.succeeded,
        summary.duration.as_secs()
    );
    if let Some(path) = &summary.failure_log {
        println!("Failures logged to {}", path.display());
    }

    if summary.cancelled {
        tracing::warn!("Run interrupted before all assets were scheduled");
    } else if summary.is_run_failure() {
        tracing::error!("Run failed: no asset could be downloaded");
    }

    Ok(ExitCode::from(summary.exit_code()))
}
