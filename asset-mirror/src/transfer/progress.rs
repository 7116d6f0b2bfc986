//! Run-wide download progress.
//!
//! Workers bump shared atomic counters; a reporter turns periodic
//! snapshots into a speed and an ETA for the log.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by every worker of one scheduler run.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    total_tasks: AtomicUsize,
    finished: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    retries: AtomicUsize,
    bytes: AtomicU64,
}

impl ProgressCounters {
    pub fn new(total_tasks: usize) -> Self {
        let counters = Self::default();
        counters.total_tasks.store(total_tasks, Ordering::Relaxed);
        counters
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self, succeeded: bool, skipped: bool) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if skipped {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_tasks: usize,
    pub finished: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retries: usize,
    pub bytes: u64,
}

impl ProgressSnapshot {
    /// Share of tasks finished (0-100). An empty run is complete.
    pub fn percent_complete(&self) -> f64 {
        if self.total_tasks == 0 {
            100.0
        } else {
            self.finished as f64 / self.total_tasks as f64 * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.finished >= self.total_tasks
    }
}

/// Speed and ETA derived from successive snapshots.
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    bytes_per_second: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            bytes_per_second: 0,
        }
    }

    /// Fold in a snapshot and return the instantaneous byte rate.
    pub fn update(&mut self, snapshot: &ProgressSnapshot) -> u64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = snapshot.bytes.saturating_sub(self.last_bytes);
            self.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        self.last_update_time = now;
        self.last_bytes = snapshot.bytes;
        self.bytes_per_second
    }

    /// Remaining seconds, extrapolated from the task completion rate.
    pub fn eta_seconds(&self, snapshot: &ProgressSnapshot) -> Option<u64> {
        let elapsed = self.elapsed().as_secs_f64();
        if snapshot.finished == 0 || elapsed <= 0.0 {
            return None;
        }
        let per_task = elapsed / snapshot.finished as f64;
        let remaining = snapshot.total_tasks.saturating_sub(snapshot.finished);
        Some((per_task * remaining as f64) as u64)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.last_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
