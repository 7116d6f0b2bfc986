//! Mirror run executor - drives one diff → download → extract pass.
//!
//! 1. Load the baseline and candidate manifests
//! 2. Diff them, filter by date and write the diff manifest
//! 3. Size the worker pool from system load and download the new assets
//! 4. Re-run retryable failures once, then write the failure log and report
//! 5. Re-size the pool and hand every present asset to the extractor

pub mod extract;

use crate::config::Config;
use crate::fs::walker::{find_latest_manifest, remove_stale_parts, tree_stats, TreeStats, WalkOptions};
use crate::manifest::{diff_filtered, write_manifest, DateRange, DiffSummary, Manifest, ManifestFormat, ManifestStore};
use crate::resources::{AdaptiveWorkerPool, ResourceMonitor};
use crate::transfer::progress::format_bytes;
use crate::transfer::{
    build_tasks, AggregateReport, DownloadOutcome, DownloadScheduler, DownloadTask, Fetcher, RemoteLayout,
    ResultAggregator, RetryPolicy,
};
use crate::utils::{MirrorError, Result};
use chrono::{DateTime, Utc};
use extract::{ExtractionStats, Extractor};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name of the machine-readable run report written into the output root.
pub const REPORT_FILE_NAME: &str = "download_report.json";

/// Exit status of a run stopped by SIGINT or SIGTERM.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Everything one run needs to know.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Absent means bootstrap: every candidate entry is new
    pub baseline: Option<PathBuf>,
    pub candidate: PathBuf,
    pub format: ManifestFormat,
    pub range: DateRange,
    pub diff_output: PathBuf,
    pub layout: RemoteLayout,
    pub output_dir: PathBuf,
    pub retry_sweep: bool,
}

impl SyncJob {
    pub fn from_config(config: &Config) -> Result<Self> {
        let candidate = config
            .manifest
            .candidate
            .clone()
            .ok_or_else(|| MirrorError::Config("manifest.candidate must be set".to_string()))?;

        Ok(Self {
            baseline: config.manifest.baseline.clone(),
            candidate,
            format: config.manifest_format(),
            range: config.date_range()?,
            diff_output: config.diff_output(),
            layout: RemoteLayout::new(config.remote.base_url.trim(), config.remote.suffix.clone()),
            output_dir: config.download.output_dir.clone(),
            retry_sweep: config.download.retry_sweep,
        })
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub diff: DiffSummary,
    pub report: AggregateReport,
    pub extraction: ExtractionStats,
    /// Assets present in the output root after the run
    pub cache: TreeStats,
    pub diff_manifest: Option<PathBuf>,
    pub failure_log: Option<PathBuf>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl RunSummary {
    /// Nothing succeeded and something failed.
    pub fn is_run_failure(&self) -> bool {
        self.report.is_run_failure()
    }

    /// Process exit status: 130 when interrupted, 1 on run failure, else 0.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            EXIT_INTERRUPTED
        } else if self.is_run_failure() {
            1
        } else {
            0
        }
    }
}

#[derive(Serialize)]
struct RunReport<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    cancelled: bool,
    diff: &'a DiffSummary,
    report: &'a AggregateReport,
}

/// Runs [`SyncJob`]s.
pub struct SyncExecutor<F, M, E> {
    scheduler: DownloadScheduler<F>,
    workers: AdaptiveWorkerPool<M>,
    extractor: Arc<E>,
    cancel: CancellationToken,
}

impl<F, M, E> SyncExecutor<F, M, E>
where
    F: Fetcher,
    M: ResourceMonitor,
    E: Extractor,
{
    /// `workers` fixes the pool size; `None` sizes it from `monitor`.
    pub fn new(fetcher: F, monitor: M, extractor: E, workers: Option<usize>) -> Self {
        let workers = AdaptiveWorkerPool::new(monitor, workers);
        let scheduler = DownloadScheduler::new(fetcher, workers.pool().clone());

        Self {
            scheduler,
            workers,
            extractor: Arc::new(extractor),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.scheduler = self.scheduler.with_policy(policy);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.scheduler = self.scheduler.with_progress_interval(interval);
        self
    }

    /// Cancelling `cancel` stops new downloads and extractions.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.scheduler = self.scheduler.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Execute a mirror run
    pub async fn run(&self, job: &SyncJob) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start_time = Instant::now();

        info!(%run_id, candidate = %job.candidate.display(), "Starting mirror run");

        let (baseline, candidate) = load_manifests(job).await?;
        let (diff, diff_summary) = diff_filtered(&baseline, &candidate, &job.range);
        drop(baseline);
        drop(candidate);

        let diff_manifest = if diff.is_empty() {
            info!("No new assets in the candidate manifest");
            None
        } else {
            Some(write_manifest(&diff, &job.format, &job.diff_output)?)
        };

        let output_dir = job.output_dir.clone();
        let stale = tokio::task::spawn_blocking(move || remove_stale_parts(&output_dir))
            .await
            .map_err(|e| MirrorError::Io(std::io::Error::other(e)))??;
        if stale > 0 {
            info!(count = stale, "Removed partial downloads from an earlier run");
        }

        let tasks = build_tasks(&diff, &job.layout, &job.output_dir);
        drop(diff);

        self.workers.resample("download").await;
        let (outcomes, report) = self.download(tasks, job.retry_sweep).await;

        let failure_log = report.write_failure_log(&job.output_dir)?;
        if let Some(path) = &failure_log {
            warn!(path = %path.display(), failures = report.failed_count, "Wrote failure log");
        }
        let cancelled = self.cancel.is_cancelled();
        write_report(
            &job.output_dir.join(REPORT_FILE_NAME),
            &RunReport {
                run_id,
                started_at,
                finished_at: Utc::now(),
                cancelled,
                diff: &diff_summary,
                report: &report,
            },
        )?;

        let extraction = if report.success_count == 0 {
            info!("Nothing downloaded, skipping extraction");
            ExtractionStats::default()
        } else {
            self.workers.resample("extract").await;
            self.extract_all(&outcomes).await
        };

        let output_dir = job.output_dir.clone();
        let suffix = job.layout.suffix.clone();
        let cache = tokio::task::spawn_blocking(move || tree_stats(&output_dir, &WalkOptions::with_suffix(suffix)))
            .await
            .map_err(|e| MirrorError::Io(std::io::Error::other(e)))??;

        let summary = RunSummary {
            run_id,
            started_at,
            diff: diff_summary,
            report,
            extraction,
            cache,
            diff_manifest,
            failure_log,
            cancelled: self.cancel.is_cancelled(),
            duration: start_time.elapsed(),
        };

        info!(
            %run_id,
            succeeded = summary.report.success_count,
            failed = summary.report.failed_count,
            skipped = summary.report.skipped_count,
            extracted = summary.extraction.succeeded,
            cached_files = summary.cache.files,
            secs = summary.duration.as_secs(),
            "Mirror run complete, {} downloaded, {} cached",
            format_bytes(summary.report.bytes),
            format_bytes(summary.cache.bytes)
        );
        if summary.is_run_failure() {
            error!(%run_id, failed = summary.report.failed_count, "No asset could be downloaded");
        }

        Ok(summary)
    }

    /// First pass, then one sweep over the retryable failures.
    async fn download(
        &self,
        tasks: Vec<DownloadTask>,
        retry_sweep: bool,
    ) -> (Vec<DownloadOutcome>, AggregateReport) {
        let aggregator = ResultAggregator::new();
        let mut outcomes = self.scheduler.run_with(tasks, &aggregator).await;
        let mut report = aggregator.snapshot().await;

        if !retry_sweep || self.cancel.is_cancelled() {
            return (outcomes, report);
        }

        let retry: Vec<_> = outcomes
            .iter()
            .filter(|o| o.is_retryable())
            .map(|o| {
                let mut task = o.task.clone();
                task.attempt = 1;
                task
            })
            .collect();
        if retry.is_empty() {
            return (outcomes, report);
        }

        info!(count = retry.len(), "Retrying failed downloads");
        let sweep = ResultAggregator::new();
        let retried: HashMap<PathBuf, DownloadOutcome> = self
            .scheduler
            .run_with(retry, &sweep)
            .await
            .into_iter()
            .map(|o| (o.task.destination.clone(), o))
            .collect();
        report.absorb_retry_sweep(sweep.snapshot().await);

        let mut retried = retried;
        for outcome in &mut outcomes {
            if let Some(second) = retried.remove(&outcome.task.destination) {
                *outcome = second;
            }
        }

        (outcomes, report)
    }

    /// Hand every successfully present asset to the extractor, bounded by the pool.
    async fn extract_all(&self, outcomes: &[DownloadOutcome]) -> ExtractionStats {
        let assets: Vec<PathBuf> = outcomes
            .iter()
            .filter(|o| o.succeeded)
            .map(|o| o.task.destination.clone())
            .collect();

        info!(assets = assets.len(), workers = self.workers.pool().limit(), "Starting extraction");

        let mut handles = Vec::with_capacity(assets.len());
        for asset in assets {
            let pool = self.workers.pool().clone();
            let extractor = Arc::clone(&self.extractor);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                let admitted = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = pool.acquire() => permit,
                };
                let Some(_permit) = admitted else {
                    return None;
                };
                let result = extractor.extract(&asset).await;
                if let Err(e) = &result {
                    warn!(path = %asset.display(), "Extraction failed: {}", e);
                }
                Some(result.is_ok())
            }));
        }

        let mut stats = ExtractionStats::default();
        for handle in handles {
            match handle.await {
                Ok(Some(true)) => stats.succeeded += 1,
                Ok(Some(false)) => stats.failed += 1,
                Ok(None) => stats.skipped += 1,
                Err(e) => {
                    warn!("Extraction task panicked: {}", e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            skipped = stats.skipped,
            "Extraction complete"
        );
        stats
    }
}

/// Load both manifests off the async runtime. Either failure aborts the run.
async fn load_manifests(job: &SyncJob) -> Result<(Manifest, Manifest)> {
    let store = ManifestStore::new(job.format.clone());
    let baseline = job.baseline.clone();
    let candidate = job.candidate.clone();

    tokio::task::spawn_blocking(move || -> Result<(Manifest, Manifest)> {
        let baseline = match baseline {
            Some(path) => store.load(&resolve_manifest_path(&path)?)?,
            None => {
                info!("No baseline manifest configured, mirroring the whole candidate");
                Manifest::empty()
            }
        };
        let candidate = store.load(&resolve_manifest_path(&candidate)?)?;
        Ok((baseline, candidate))
    })
    .await
    .map_err(|e| MirrorError::Io(std::io::Error::other(e)))?
}

/// A directory stands for the newest `*.xml` file inside it.
pub fn resolve_manifest_path(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }

    find_latest_manifest(path)?.ok_or_else(|| {
        MirrorError::Config(format!("no manifest (*.xml) found in {}", path.display()))
    })
}

fn write_report(path: &Path, report: &RunReport<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
