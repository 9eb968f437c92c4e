//! Progress reporter implementation
//!
//! The walk discovers work as it goes, so the task bar grows while the sync
//! runs instead of starting from a known total.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Progress reporter for sync sessions
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Scheduled vs finished remote operations
    tasks_bar: ProgressBar,
    /// Current entry being processed
    status: ProgressBar,
    /// Start time
    start_time: Instant,
    /// Tasks scheduled so far
    tasks_scheduled: AtomicU64,
    /// Tasks finished so far
    tasks_finished: AtomicU64,
    /// Bytes uploaded so far
    bytes_uploaded: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let tasks_bar = multi.add(ProgressBar::new(0));
        tasks_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} entries {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        tasks_bar.set_prefix("Sync");

        Self {
            multi,
            tasks_bar,
            status,
            start_time: Instant::now(),
            tasks_scheduled: AtomicU64::new(0),
            tasks_finished: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Record a newly scheduled task
    pub fn task_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
        self.tasks_bar.inc_length(1);
    }

    /// Record a finished task
    pub fn task_finished(&self) {
        self.tasks_finished.fetch_add(1, Ordering::Relaxed);
        self.tasks_bar.inc(1);
    }

    /// Record uploaded bytes
    pub fn add_bytes(&self, bytes: u64) {
        let total = self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.tasks_bar
            .set_message(humansize::format_size(total, humansize::BINARY));
    }

    /// Set current entry being processed
    pub fn set_current(&self, path: &str) {
        let display = if path.chars().count() > 60 {
            let tail: String = path.chars().rev().take(57).collect::<Vec<_>>().into_iter().rev().collect();
            format!("...{}", tail)
        } else {
            path.to_string()
        };
        self.status.set_message(display);
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        self.tasks_bar.finish();
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.tasks_bar.abandon();
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Get progress summary
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            tasks_scheduled: self.tasks_scheduled.load(Ordering::Relaxed),
            tasks_finished: self.tasks_finished.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress summary
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Tasks scheduled
    pub tasks_scheduled: u64,
    /// Tasks finished
    pub tasks_finished: u64,
    /// Bytes uploaded
    pub bytes_uploaded: u64,
    /// Elapsed time
    pub elapsed: Duration,
}

impl ProgressSummary {
    /// Get completion percentage
    pub fn percentage(&self) -> f64 {
        if self.tasks_scheduled == 0 {
            0.0
        } else {
            (self.tasks_finished as f64 / self.tasks_scheduled as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter() {
        let reporter = ProgressReporter::disabled();
        assert!(!reporter.is_enabled());

        for _ in 0..4 {
            reporter.task_scheduled();
        }
        reporter.task_finished();
        reporter.task_finished();
        reporter.add_bytes(512);
        reporter.set_current("/a/very/long/path/that/keeps/going/and/going/and/going/until/it/is/truncated.txt");

        let summary = reporter.summary();
        assert_eq!(summary.tasks_scheduled, 4);
        assert_eq!(summary.tasks_finished, 2);
        assert_eq!(summary.bytes_uploaded, 512);
        assert_eq!(summary.percentage(), 50.0);

        reporter.finish_success("done");
    }
}
