//! Fetching assets: tasks, the HTTP seam, scheduling and result totals.

pub mod aggregate;
pub mod fetcher;
pub mod progress;
pub mod scheduler;
pub mod task;

pub use aggregate::{aggregate, AggregateReport, FailureRecord, ResultAggregator};
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use scheduler::{DownloadScheduler, RetryPolicy};
pub use task::{build_tasks, DownloadOutcome, DownloadTask, RemoteLayout, TaskState};
