//! Folding download outcomes into run totals.
//!
//! Folding is commutative: the totals do not depend on the order in which
//! outcomes arrive. Failure records are appended in arrival order.

use super::task::DownloadOutcome;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Name of the human-readable failure log written into the output root.
pub const FAILURE_LOG_NAME: &str = "download_errors.log";

/// One failed asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub url: String,
    pub reason: String,
    pub terminal: bool,
}

/// Totals over a batch of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    /// Includes skipped assets
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub bytes: u64,
    pub failures: Vec<FailureRecord>,
}

impl AggregateReport {
    pub fn record(&mut self, outcome: &DownloadOutcome) {
        if outcome.succeeded {
            self.success_count += 1;
            if outcome.skipped {
                self.skipped_count += 1;
            }
            self.bytes += outcome.bytes;
        } else {
            self.failed_count += 1;
            self.failures.push(FailureRecord {
                url: outcome.task.source_url.clone(),
                reason: outcome.error.clone().unwrap_or_default(),
                terminal: outcome.terminal,
            });
        }
    }

    pub fn merge(&mut self, other: AggregateReport) {
        self.success_count += other.success_count;
        self.failed_count += other.failed_count;
        self.skipped_count += other.skipped_count;
        self.bytes += other.bytes;
        self.failures.extend(other.failures);
    }

    pub fn total(&self) -> usize {
        self.success_count + self.failed_count
    }

    /// A run fails only when nothing succeeded and something failed.
    pub fn is_run_failure(&self) -> bool {
        self.success_count == 0 && self.failed_count > 0
    }

    /// Replace every non-terminal failure with the results of re-running it.
    ///
    /// `sweep` must be the report of a batch that re-ran exactly those
    /// failures.
    pub fn absorb_retry_sweep(&mut self, sweep: AggregateReport) {
        let before = self.failures.len();
        self.failures.retain(|f| f.terminal);
        self.failed_count -= before - self.failures.len();
        self.merge(sweep);
    }

    /// Write `download_errors.log` into `dir` when there are failures.
    ///
    /// Returns the path written, or `None` when there was nothing to log.
    pub fn write_failure_log(&self, dir: &Path) -> std::io::Result<Option<PathBuf>> {
        if self.failures.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(dir)?;
        let path = dir.join(FAILURE_LOG_NAME);
        let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        writeln!(file, "Failed downloads ({}):", self.failures.len())?;
        for failure in &self.failures {
            writeln!(file, "{}: {}", failure.url, failure.reason)?;
        }
        file.flush()?;

        Ok(Some(path))
    }
}

/// Batch form of [`ResultAggregator`].
pub fn aggregate<'a>(outcomes: impl IntoIterator<Item = &'a DownloadOutcome>) -> AggregateReport {
    let mut report = AggregateReport::default();
    for outcome in outcomes {
        report.record(outcome);
    }
    report
}

/// Shared, incrementally updated [`AggregateReport`].
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    report: Arc<Mutex<AggregateReport>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: &DownloadOutcome) {
        self.report.lock().await.record(outcome);
    }

    pub async fn snapshot(&self) -> AggregateReport {
        self.report.lock().await.clone()
    }
}
