//! Download tasks, their lifecycle states and final outcomes.

use crate::manifest::ManifestEntry;
use std::path::{Component, Path, PathBuf};

/// Where remote assets live and how their URLs are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    /// Prefix every key is appended to, e.g. `http://cdn.example/play/`
    pub base_url: String,
    /// Appended after the key, e.g. `.swf`
    pub suffix: String,
}

impl RemoteLayout {
    pub fn new(base_url: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            suffix: suffix.into(),
        }
    }

    /// `base_url + key + suffix`
    pub fn url_for(&self, key: &str) -> String {
        format!("{}{}{}", self.base_url, key, self.suffix)
    }
}

/// One asset to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub key: String,
    pub source_url: String,
    pub destination: PathBuf,
    /// 1-based attempt counter
    pub attempt: u32,
}

impl DownloadTask {
    /// Derive a task from a manifest entry.
    ///
    /// A pre-resolved URL on the entry wins over the constructed one.
    pub fn from_entry(entry: &ManifestEntry, layout: &RemoteLayout, output_root: &Path) -> Self {
        let source_url = entry
            .url
            .clone()
            .unwrap_or_else(|| layout.url_for(&entry.key));

        Self {
            key: entry.key.clone(),
            source_url,
            destination: destination_for(output_root, &entry.key, &layout.suffix),
            attempt: 1,
        }
    }
}

/// `output_root / key + suffix`, keeping the key's directory segments.
///
/// Both `/` and `\` separate segments. Empty, `.` and `..` segments are
/// dropped so a key can never point outside `output_root`.
pub fn destination_for(output_root: &Path, key: &str, suffix: &str) -> PathBuf {
    let mut path = output_root.to_path_buf();
    let segments: Vec<&str> = key
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .filter(|s| {
            !matches!(
                Path::new(s).components().next(),
                Some(Component::CurDir | Component::ParentDir)
            )
        })
        .collect();

    if let Some((last, dirs)) = segments.split_last() {
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{last}{suffix}"));
    } else {
        path.push(format!("_{suffix}"));
    }
    path
}

/// Build one task per entry, dropping entries whose destination repeats.
pub fn build_tasks<'a>(
    entries: impl IntoIterator<Item = &'a ManifestEntry>,
    layout: &RemoteLayout,
    output_root: &Path,
) -> Vec<DownloadTask> {
    let mut seen = std::collections::HashSet::new();
    let mut tasks = Vec::new();

    for entry in entries {
        let task = DownloadTask::from_entry(entry, layout, output_root);
        if seen.insert(task.destination.clone()) {
            tasks.push(task);
        } else {
            tracing::warn!(
                key = %entry.key,
                path = %task.destination.display(),
                "Skipping entry that maps to an already scheduled destination"
            );
        }
    }

    tasks
}

/// Lifecycle of a task inside the scheduler.
///
/// `Pending → InFlight → {Success, RetryScheduled, Failed}`, and
/// `RetryScheduled → InFlight`. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    RetryScheduled { last_error: String },
    Success { bytes: u64, skipped: bool },
    Failed { terminal: bool, detail: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success { .. } | TaskState::Failed { .. })
    }
}

/// Final result of one task. Produced exactly once per task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub task: DownloadTask,
    pub succeeded: bool,
    /// No further attempt may be made (not found, cancelled)
    pub terminal: bool,
    /// Fetch attempts made; 0 when the file was already present
    pub attempts_used: u32,
    /// Present iff not succeeded
    pub error: Option<String>,
    pub bytes: u64,
    /// Satisfied by a file already on disk
    pub skipped: bool,
}

impl DownloadOutcome {
    pub fn success(task: DownloadTask, bytes: u64) -> Self {
        let attempts_used = task.attempt;
        Self {
            task,
            succeeded: true,
            terminal: false,
            attempts_used,
            error: None,
            bytes,
            skipped: false,
        }
    }

    pub fn skipped(task: DownloadTask) -> Self {
        Self {
            task,
            succeeded: true,
            terminal: false,
            attempts_used: 0,
            error: None,
            bytes: 0,
            skipped: true,
        }
    }

    pub fn failed(task: DownloadTask, attempts_used: u32, terminal: bool, detail: String) -> Self {
        Self {
            task,
            succeeded: false,
            terminal,
            attempts_used,
            error: Some(detail),
            bytes: 0,
            skipped: false,
        }
    }

    /// Failed, but another attempt could still succeed.
    pub fn is_retryable(&self) -> bool {
        !self.succeeded && !self.terminal
    }
}
