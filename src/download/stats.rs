//! Run-wide counters and derived progress reporting.
//!
//! Workers only ever increment; readers take best-effort snapshots. Progress
//! and ETA are computed from snapshots in the driver loop, never from inside
//! a worker, so there is no check-then-log race between tasks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::HumanBytes;
use serde::Serialize;

/// Terminal result of one key, recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Skipped,
    Downloaded { bytes: u64 },
    Failed { error: String },
}

/// Lock-free run counters shared by every task.
#[derive(Debug)]
pub struct StatsAggregator {
    downloaded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    total_bytes: AtomicU64,
    /// Number of keys the run expects to process; 0 means unknown.
    expected_total: AtomicU64,
    started: Instant,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            expected_total: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn set_expected_total(&self, total: u64) {
        self.expected_total.store(total, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            DownloadOutcome::Downloaded { bytes } => {
                self.total_bytes.fetch_add(*bytes, Ordering::Relaxed);
                self.downloaded.fetch_add(1, Ordering::Relaxed);
            }
            DownloadOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Momentary view of the counters. Fields are read independently and may
    /// straddle an in-flight update.
    pub fn snapshot(&self) -> StatsSnapshot {
        let expected = self.expected_total.load(Ordering::Relaxed);
        StatsSnapshot {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            expected_total: (expected > 0).then_some(expected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total_bytes: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub expected_total: Option<u64>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl StatsSnapshot {
    pub fn processed(&self) -> u64 {
        self.downloaded + self.skipped + self.failed
    }

    /// Average bytes per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} failed, {} total; {} in {} ({}/s)",
            self.downloaded,
            self.skipped,
            self.failed,
            self.processed(),
            HumanBytes(self.total_bytes),
            format_duration(self.elapsed),
            HumanBytes(self.throughput() as u64),
        )
    }
}

/// A derived progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub processed: u64,
    pub expected_total: Option<u64>,
    pub total_bytes: u64,
    pub elapsed: Duration,
    /// Items per second since the run started.
    pub rate: f64,
    /// Items per second since the previous report.
    pub interval_rate: f64,
    /// `None` when the total is unknown or nothing moved in the last interval.
    pub eta: Option<Duration>,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expected_total {
            Some(total) => write!(f, "{}/{} objects", self.processed, total)?,
            None => write!(f, "{} objects", self.processed)?,
        }
        write!(
            f,
            ", {}, {:.1} obj/s, elapsed {}, ETA ",
            HumanBytes(self.total_bytes),
            self.rate,
            format_duration(self.elapsed)
        )?;
        match self.eta {
            Some(eta) => write!(f, "{}", format_duration(eta)),
            None => write!(f, "unknown"),
        }
    }
}

/// Emits a [`ProgressReport`] every `every` processed items.
///
/// Owned by the single driver loop; workers never touch it.
#[derive(Debug)]
pub struct ProgressTracker {
    every: u64,
    next_at: u64,
    last_processed: u64,
    last_elapsed: Duration,
}

impl ProgressTracker {
    pub fn new(every: u64) -> Self {
        let every = every.max(1);
        Self {
            every,
            next_at: every,
            last_processed: 0,
            last_elapsed: Duration::ZERO,
        }
    }

    /// Feed a fresh snapshot; returns a report once the next threshold has
    /// been crossed.
    pub fn observe(&mut self, snapshot: &StatsSnapshot) -> Option<ProgressReport> {
        let processed = snapshot.processed();
        if processed < self.next_at {
            return None;
        }
        let report = build_report(snapshot, self.last_processed, self.last_elapsed);
        self.last_processed = processed;
        self.last_elapsed = snapshot.elapsed;
        self.next_at = (processed / self.every + 1) * self.every;
        Some(report)
    }
}

fn build_report(
    snapshot: &StatsSnapshot,
    last_processed: u64,
    last_elapsed: Duration,
) -> ProgressReport {
    let processed = snapshot.processed();
    let secs = snapshot.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        processed as f64 / secs
    } else {
        0.0
    };

    let interval_secs = snapshot.elapsed.saturating_sub(last_elapsed).as_secs_f64();
    let interval_items = processed.saturating_sub(last_processed);
    let interval_rate = if interval_secs > 0.0 {
        interval_items as f64 / interval_secs
    } else {
        0.0
    };

    let eta = snapshot.expected_total.and_then(|total| {
        if interval_rate <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(processed);
        Some(Duration::from_secs_f64(remaining as f64 / interval_rate))
    });

    ProgressReport {
        processed,
        expected_total: snapshot.expected_total,
        total_bytes: snapshot.total_bytes,
        elapsed: snapshot.elapsed,
        rate,
        interval_rate,
        eta,
    }
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
