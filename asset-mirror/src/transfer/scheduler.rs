//! Concurrent download scheduling with bounded retries.
//!
//! Every task runs its own state machine:
//!
//! ```text
//! Pending ──(file present)──────────────────────────► Success (skipped)
//!    │
//!    └─(slot acquired)─► InFlight ──ok──────────────► Success
//!                          │  ▲  ──not found────────► Failed (terminal)
//!                          │  │  ──error, budget left─► RetryScheduled
//!                          │  └───────(delay)──────────────┘
//!                          └──error, budget spent───► Failed
//! ```
//!
//! Admission goes through a shared [`WorkerPool`], so the concurrency
//! limit may change while a batch runs.

use super::aggregate::ResultAggregator;
use super::fetcher::{FetchError, Fetcher};
use super::progress::{format_bytes, format_duration, format_speed, ProgressCounters, ProgressTracker};
use super::task::{DownloadOutcome, DownloadTask, TaskState};
use crate::resources::{WorkerPermit, WorkerPool};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Failure reason recorded for tasks that never started because the run
/// was cancelled.
pub const CANCELLED_REASON: &str = "cancelled";

/// How many times a task may be attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Runs batches of [`DownloadTask`]s through a [`Fetcher`].
pub struct DownloadScheduler<F> {
    fetcher: Arc<F>,
    pool: WorkerPool,
    policy: RetryPolicy,
    cancel: CancellationToken,
    progress_interval: Duration,
}

impl<F: Fetcher> DownloadScheduler<F> {
    pub fn new(fetcher: F, pool: WorkerPool) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            pool,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            progress_interval: Duration::from_secs(5),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            delay: policy.delay,
        };
        self
    }

    /// Once `cancel` fires no new task is admitted.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `tasks` with at most `worker_limit` in flight.
    ///
    /// Returns one outcome per task, in input order.
    pub async fn run(&self, tasks: Vec<DownloadTask>, worker_limit: usize) -> Vec<DownloadOutcome> {
        self.pool.resize(worker_limit);
        self.dispatch(tasks, None).await
    }

    /// Run `tasks` under the pool's current limit, recording each outcome
    /// into `aggregator` as soon as it is known.
    pub async fn run_with(
        &self,
        tasks: Vec<DownloadTask>,
        aggregator: &ResultAggregator,
    ) -> Vec<DownloadOutcome> {
        self.dispatch(tasks, Some(aggregator.clone())).await
    }

    async fn dispatch(
        &self,
        tasks: Vec<DownloadTask>,
        aggregator: Option<ResultAggregator>,
    ) -> Vec<DownloadOutcome> {
        let total = tasks.len();
        let counters = Arc::new(ProgressCounters::new(total));
        let batch_done = CancellationToken::new();

        info!(
            tasks = total,
            workers = self.pool.limit(),
            max_attempts = self.policy.max_attempts,
            "Starting download batch"
        );

        let reporter = tokio::spawn(report_progress(
            Arc::clone(&counters),
            self.progress_interval,
            batch_done.clone(),
        ));

        let mut handles = Vec::with_capacity(total);
        for task in tasks {
            let fetcher = Arc::clone(&self.fetcher);
            let pool = self.pool.clone();
            let policy = self.policy;
            let cancel = self.cancel.clone();
            let counters = Arc::clone(&counters);
            let aggregator = aggregator.clone();
            let fallback = task.clone();

            let handle = tokio::spawn(async move {
                let outcome = drive(fetcher.as_ref(), task, policy, &pool, &cancel, &counters).await;
                counters.record_finished(outcome.succeeded, outcome.skipped);
                if let Some(aggregator) = &aggregator {
                    aggregator.record(&outcome).await;
                }
                outcome
            });
            handles.push((fallback, handle));
        }

        let mut outcomes = Vec::with_capacity(total);
        for (task, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(url = %task.source_url, "Download worker panicked: {}", e);
                    let outcome = DownloadOutcome::failed(task, 0, false, format!("worker failed: {e}"));
                    counters.record_finished(false, false);
                    if let Some(aggregator) = &aggregator {
                        aggregator.record(&outcome).await;
                    }
                    outcomes.push(outcome);
                }
            }
        }

        batch_done.cancel();
        let _ = reporter.await;

        let snapshot = counters.snapshot();
        info!(
            finished = snapshot.finished,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            retries = snapshot.retries,
            "Download batch complete, {} fetched",
            format_bytes(snapshot.bytes)
        );

        outcomes
    }
}

/// Drive one task from `Pending` to a terminal state.
async fn drive<F: Fetcher>(
    fetcher: &F,
    mut task: DownloadTask,
    policy: RetryPolicy,
    pool: &WorkerPool,
    cancel: &CancellationToken,
    counters: &ProgressCounters,
) -> DownloadOutcome {
    let mut state = TaskState::Pending;
    let mut _permit: Option<WorkerPermit> = None;

    loop {
        state = match state {
            TaskState::Pending => {
                if is_present(&task.destination).await {
                    TaskState::Success { bytes: 0, skipped: true }
                } else {
                    let admitted = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = pool.acquire() => permit,
                    };
                    match admitted {
                        Some(permit) => {
                            _permit = Some(permit);
                            TaskState::InFlight
                        }
                        None => {
                            return DownloadOutcome::failed(task, 0, true, CANCELLED_REASON.to_string())
                        }
                    }
                }
            }

            TaskState::InFlight => match attempt(fetcher, &task).await {
                Ok(bytes) => {
                    counters.add_bytes(bytes);
                    TaskState::Success { bytes, skipped: false }
                }
                Err(e) if e.is_terminal() => {
                    error!(url = %task.source_url, attempt = task.attempt, "Download failed: {}", e);
                    TaskState::Failed {
                        terminal: true,
                        detail: e.to_string(),
                    }
                }
                Err(e) if task.attempt < policy.max_attempts => TaskState::RetryScheduled {
                    last_error: e.to_string(),
                },
                Err(e) => {
                    error!(url = %task.source_url, attempt = task.attempt, "Download failed: {}", e);
                    TaskState::Failed {
                        terminal: false,
                        detail: format!("{} after {} attempts", e, task.attempt),
                    }
                }
            },

            TaskState::RetryScheduled { last_error } => {
                warn!(
                    url = %task.source_url,
                    attempt = task.attempt,
                    max_attempts = policy.max_attempts,
                    "Download attempt failed, retrying: {}",
                    last_error
                );
                counters.record_retry();
                tokio::time::sleep(policy.delay).await;
                task.attempt += 1;
                TaskState::InFlight
            }

            TaskState::Success { skipped: true, .. } => return DownloadOutcome::skipped(task),

            TaskState::Success { bytes, .. } => return DownloadOutcome::success(task, bytes),

            TaskState::Failed { terminal, detail } => {
                let attempts = task.attempt;
                return DownloadOutcome::failed(task, attempts, terminal, detail);
            }
        };
    }
}

async fn attempt<F: Fetcher>(fetcher: &F, task: &DownloadTask) -> Result<u64, FetchError> {
    if let Some(parent) = task.destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    fetcher.fetch(&task.source_url, &task.destination).await
}

/// A non-empty regular file already sits at `path`.
async fn is_present(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

async fn report_progress(counters: Arc<ProgressCounters>, every: Duration, done: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    let mut tracker = ProgressTracker::new();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = done.cancelled() => break,
        }

        let snapshot = counters.snapshot();
        let speed = tracker.update(&snapshot);
        info!(
            completed = snapshot.finished,
            total = snapshot.total_tasks,
            failed = snapshot.failed,
            percent = snapshot.percent_complete(),
            "Download progress: {} fetched at {}, eta {}",
            format_bytes(snapshot.bytes),
            format_speed(speed),
            tracker
                .eta_seconds(&snapshot)
                .map(format_duration)
                .unwrap_or_else(|| "unknown".to_string())
        );
    }
}
