//! Download engine: bounded-concurrency scheduler over per-key tasks.
//!
//! Keys are fed lazily into `buffer_unordered`, so at most `workers` tasks
//! are in flight and no per-key future exists before a slot frees up. Each
//! task owns its key end to end (decide, stream, verify, publish) and records
//! exactly one outcome in the shared [`StatsAggregator`].

pub mod error;
pub mod file;
pub mod paths;
pub mod planner;
pub mod stats;
pub mod task;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::retry::RetryConfig;
use crate::store::{ObjectKey, ObjectStore};
use planner::DestinationLayout;
use stats::{format_duration, DownloadOutcome, ProgressTracker, StatsAggregator, StatsSnapshot};
use task::{DownloadTask, TaskReport};

/// Subset of application config consumed by the download engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) directory: PathBuf,
    pub(crate) strip_prefix: Option<String>,
    pub(crate) workers: usize,
    pub(crate) retry: RetryConfig,
    pub(crate) report_every: u64,
    pub(crate) shutdown_grace: Duration,
    pub(crate) no_progress_bar: bool,
}

/// Everything a run shares between its tasks. Built once by the caller and
/// borrowed by every worker for the lifetime of [`run_mirror`].
pub struct MirrorContext {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) config: DownloadConfig,
    pub(crate) layout: DestinationLayout,
    pub(crate) stats: StatsAggregator,
    pub(crate) shutdown: CancellationToken,
}

impl MirrorContext {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: DownloadConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let layout = DestinationLayout {
            root: config.directory.clone(),
            strip_prefix: config.strip_prefix.clone(),
        };
        Self {
            store,
            config,
            layout,
            stats: StatsAggregator::new(),
            shutdown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedKey {
    pub key: ObjectKey,
    pub error: String,
    pub attempts: u32,
}

/// Final accounting of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub snapshot: StatsSnapshot,
    pub failures: Vec<FailedKey>,
    /// Set when a shutdown request stopped the run before every key was handled.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn log(&self) {
        let s = &self.snapshot;
        tracing::info!("── Summary ──");
        if self.interrupted {
            tracing::info!(
                "  Interrupted: processed {} of {} keys before shutdown",
                s.processed(),
                s.expected_total.unwrap_or(0)
            );
        }
        tracing::info!(
            "  {} downloaded, {} skipped, {} failed, {} total",
            s.downloaded,
            s.skipped,
            s.failed,
            s.processed()
        );
        tracing::info!(
            "  transferred: {} ({}/s)",
            indicatif::HumanBytes(s.total_bytes),
            indicatif::HumanBytes(s.throughput() as u64)
        );
        tracing::info!("  elapsed: {}", format_duration(s.elapsed));
        if !self.failures.is_empty() {
            tracing::warn!("  {} keys failed", self.failures.len());
            for failure in &self.failures {
                tracing::debug!(
                    "  failed: {} after {} attempt(s): {}",
                    failure.key,
                    failure.attempts,
                    failure.error
                );
            }
        }
    }
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY, so piped output and cron logs stay clean.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("Falling back to default progress style: {}", e),
    }
    pb
}

/// Mirror every key in `keys` into the destination tree.
///
/// Individual key failures never abort the run; they show up in the returned
/// summary. Once shutdown is requested no new key is started, and in-flight
/// tasks get `shutdown_grace` to finish before the run gives up on them.
pub async fn run_mirror(ctx: &MirrorContext, keys: Vec<ObjectKey>) -> RunSummary {
    let total = keys.len() as u64;
    ctx.stats.set_expected_total(total);
    let pb = create_progress_bar(ctx.config.no_progress_bar, total);
    let mut tracker = ProgressTracker::new(ctx.config.report_every);
    let mut failures: Vec<FailedKey> = Vec::new();
    let shutdown = &ctx.shutdown;

    tracing::info!(
        "Mirroring {} keys from {} into {} ({} workers)",
        total,
        ctx.store.describe(),
        ctx.config.directory.display(),
        ctx.config.workers
    );

    let (keys, conflicts) = planner::partition_conflicts(&ctx.layout, keys);
    for (key, error) in conflicts {
        let report = DownloadTask::new(ctx, key).reject(error);
        handle_report(&pb, &mut failures, report);
    }

    let reports = stream::iter(keys)
        .take_while(|_| std::future::ready(!shutdown.is_cancelled()))
        .map(|key| async move { DownloadTask::new(ctx, key).run().await })
        .buffer_unordered(ctx.config.workers.max(1));
    tokio::pin!(reports);

    // `None` while running; `Some(None)` when draining without a deadline
    // because the grace period does not fit in an `Instant`.
    let mut grace_deadline: Option<Option<tokio::time::Instant>> = None;
    loop {
        if grace_deadline.is_none() && shutdown.is_cancelled() {
            pb.suspend(|| {
                tracing::info!(
                    "Shutdown requested, no new downloads; waiting up to {} for in-flight tasks",
                    format_duration(ctx.config.shutdown_grace)
                )
            });
            grace_deadline =
                Some(tokio::time::Instant::now().checked_add(ctx.config.shutdown_grace));
        }

        let next = match grace_deadline {
            None => tokio::select! {
                report = reports.next() => report,
                _ = shutdown.cancelled() => continue,
            },
            Some(None) => reports.next().await,
            Some(Some(deadline)) => match tokio::time::timeout_at(deadline, reports.next()).await {
                Ok(report) => report,
                Err(_) => {
                    pb.suspend(|| {
                        tracing::warn!("Shutdown grace period elapsed, abandoning in-flight tasks")
                    });
                    break;
                }
            },
        };
        let Some(report) = next else { break };

        handle_report(&pb, &mut failures, report);
        if let Some(progress) = tracker.observe(&ctx.stats.snapshot()) {
            pb.suspend(|| tracing::info!("Progress: {}", progress));
        }
    }

    pb.finish_and_clear();
    let snapshot = ctx.stats.snapshot();
    RunSummary {
        interrupted: shutdown.is_cancelled() && snapshot.processed() < total,
        snapshot,
        failures,
    }
}

fn handle_report(pb: &ProgressBar, failures: &mut Vec<FailedKey>, report: TaskReport) {
    pb.set_message(report.key.clone());
    if let DownloadOutcome::Failed { error } = report.outcome {
        pb.suspend(|| {
            tracing::error!(
                "Download failed: {} after {} attempt(s): {}",
                report.key,
                report.attempts,
                error
            )
        });
        failures.push(FailedKey {
            key: report.key,
            error,
            attempts: report.attempts,
        });
    }
    pb.inc(1);
}
