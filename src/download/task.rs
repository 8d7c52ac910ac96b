//! Per-key download state machine.
//!
//! ```text
//! Pending -> FetchingMetadata -> Deciding -> Skipped
//!                                         -> Streaming -> Verifying -> Publishing -> Published
//! any failure -> Retrying -> FetchingMetadata   (while attempts remain)
//!             -> Failed
//! ```
//!
//! Every attempt starts from a fresh metadata lookup, and every failed
//! attempt removes its temp file before the error leaves the attempt.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use super::error::DownloadError;
use super::planner::{self, Action};
use super::stats::DownloadOutcome;
use super::{file, paths, MirrorContext};
use crate::retry::{self, RetryAction};
use crate::store::ObjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    FetchingMetadata,
    Deciding,
    Streaming,
    Verifying,
    Publishing,
    Retrying,
    Skipped,
    Published,
    Failed,
}

/// What a task hands back to the scheduler once it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub key: ObjectKey,
    pub local_path: Option<PathBuf>,
    pub outcome: DownloadOutcome,
    /// Attempts actually started; 0 when the key was rejected up front.
    pub attempts: u32,
}

enum Attempt {
    Skipped,
    Published { bytes: u64 },
}

pub struct DownloadTask<'a> {
    ctx: &'a MirrorContext,
    key: ObjectKey,
}

impl<'a> DownloadTask<'a> {
    pub fn new(ctx: &'a MirrorContext, key: ObjectKey) -> Self {
        Self { ctx, key }
    }

    fn enter(&self, state: TaskState, attempt: u32) {
        tracing::trace!(key = %self.key, attempt, ?state, "task state");
    }

    /// Drive the key to a terminal state and record its outcome exactly once.
    pub async fn run(self) -> TaskReport {
        self.enter(TaskState::Pending, 0);

        let local_path = match self.ctx.layout.local_path(&self.key) {
            Ok(path) => path,
            Err(e) => return self.finish(None, Err(e), 0),
        };
        let temp_path = paths::temp_path_for(&local_path);

        let attempts = AtomicU32::new(0);
        let result = retry::retry_with_backoff(
            &self.ctx.config.retry,
            &self.ctx.shutdown,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            |attempt| {
                attempts.store(attempt, Ordering::Relaxed);
                if attempt > 1 {
                    self.enter(TaskState::Retrying, attempt);
                }
                self.attempt(attempt, &temp_path)
            },
        )
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        self.finish(Some(local_path), result, attempts)
    }

    /// Fail the key without making any request.
    pub fn reject(self, error: DownloadError) -> TaskReport {
        self.enter(TaskState::Pending, 0);
        self.finish(None, Err(error), 0)
    }

    fn finish(
        self,
        local_path: Option<PathBuf>,
        result: Result<Attempt, DownloadError>,
        attempts: u32,
    ) -> TaskReport {
        let outcome = match result {
            Ok(Attempt::Skipped) => {
                self.enter(TaskState::Skipped, attempts);
                tracing::debug!(key = %self.key, "Up to date, skipped");
                DownloadOutcome::Skipped
            }
            Ok(Attempt::Published { bytes }) => {
                self.enter(TaskState::Published, attempts);
                tracing::debug!(key = %self.key, bytes, attempts, "Downloaded");
                DownloadOutcome::Downloaded { bytes }
            }
            Err(e) => {
                self.enter(TaskState::Failed, attempts);
                DownloadOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        self.ctx.stats.record(&outcome);

        TaskReport {
            key: self.key,
            local_path,
            outcome,
            attempts,
        }
    }

    async fn attempt(&self, attempt: u32, temp_path: &Path) -> Result<Attempt, DownloadError> {
        let result = self.attempt_inner(attempt, temp_path).await;
        if result.is_err() {
            file::remove_temp(temp_path).await;
        }
        result
    }

    async fn attempt_inner(&self, attempt: u32, temp_path: &Path) -> Result<Attempt, DownloadError> {
        let store = self.ctx.store.as_ref();

        self.enter(TaskState::FetchingMetadata, attempt);
        let plan = planner::decide(store, &self.ctx.layout, &self.key).await?;

        self.enter(TaskState::Deciding, attempt);
        if plan.action == Action::Skip {
            return Ok(Attempt::Skipped);
        }

        self.enter(TaskState::Streaming, attempt);
        tracing::debug!(
            key = %self.key,
            size_bytes = plan.remote.size,
            last_modified = ?plan.remote.last_modified,
            path = %plan.local_path.display(),
            "downloading",
        );
        let written = file::stream_to_temp(store, &self.key, temp_path).await?;

        self.enter(TaskState::Verifying, attempt);
        let bytes = file::file_len(temp_path).await?;
        if bytes != written {
            tracing::warn!(
                key = %self.key,
                written,
                on_disk = bytes,
                "Temp file length differs from bytes streamed",
            );
        }
        file::verify_size(&self.key, plan.remote.size, bytes)?;

        self.enter(TaskState::Publishing, attempt);
        file::publish(temp_path, &plan.local_path).await?;

        Ok(Attempt::Published { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::test_support::{find_temp_files, test_context};
    use crate::store::memory::{Fault, MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fresh_key_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 500]);
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert_eq!(report.outcome, DownloadOutcome::Downloaded { bytes: 500 });
        assert_eq!(report.attempts, 1);
        assert_eq!(report.local_path, Some(dir.path().join("a/1.json")));
        assert_eq!(std::fs::read(dir.path().join("a/1.json")).unwrap(), vec![5u8; 500]);
        assert!(find_temp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_zero_byte_object_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/2.json", Vec::<u8>::new());
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/2.json".into()).run().await;
        assert_eq!(report.outcome, DownloadOutcome::Downloaded { bytes: 0 });
        assert_eq!(std::fs::metadata(dir.path().join("a/2.json")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_up_to_date_key_skipped_without_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 500]);
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/1.json"), vec![5u8; 500]).unwrap();
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert_eq!(report.outcome, DownloadOutcome::Skipped);
        assert_eq!(store.get_calls("a/1.json"), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 500]);
        store.set_fault("a/1.json", Fault::GetError { times: 2 });
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert_eq!(report.outcome, DownloadOutcome::Downloaded { bytes: 500 });
        assert_eq!(report.attempts, 3);
        assert_eq!(store.head_calls("a/1.json"), 3);
        assert_eq!(store.get_calls("a/1.json"), 3);
        assert_eq!(std::fs::read(dir.path().join("a/1.json")).unwrap(), vec![5u8; 500]);

        let snap = ctx.stats.snapshot();
        assert_eq!((snap.downloaded, snap.failed), (1, 0));
    }

    #[tokio::test]
    async fn test_metadata_failures_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 64]);
        store.set_fault("a/1.json", Fault::HeadError { times: 2 });
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert_eq!(report.outcome, DownloadOutcome::Downloaded { bytes: 64 });
        assert_eq!(report.attempts, 3);
        assert_eq!(store.head_calls("a/1.json"), 3);
        assert_eq!(store.get_calls("a/1.json"), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_and_leave_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 500]);
        store.set_fault(
            "a/1.json",
            Fault::Interrupted {
                times: u32::MAX,
                after: 200,
            },
        );
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert!(matches!(report.outcome, DownloadOutcome::Failed { .. }));
        assert_eq!(report.attempts, 3);
        assert_eq!(store.get_calls("a/1.json"), 3);
        assert!(!dir.path().join("a/1.json").exists());
        assert!(find_temp_files(dir.path()).is_empty());

        let snap = ctx.stats.snapshot();
        assert_eq!((snap.downloaded, snap.skipped, snap.failed), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_interrupted_transfer_leaves_existing_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 500]);
        store.set_fault(
            "a/1.json",
            Fault::Interrupted {
                times: u32::MAX,
                after: 300,
            },
        );
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/1.json"), b"previous run").unwrap();
        let ctx = test_context(store.clone(), dir.path(), 2);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert!(matches!(report.outcome, DownloadOutcome::Failed { .. }));
        assert_eq!(
            std::fs::read(dir.path().join("a/1.json")).unwrap(),
            b"previous run"
        );
        assert!(find_temp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 500]);
        store.set_fault(
            "a/1.json",
            Fault::Truncated {
                times: 1,
                deliver: 100,
            },
        );
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert_eq!(report.outcome, DownloadOutcome::Downloaded { bytes: 500 });
        assert_eq!(report.attempts, 2);
        assert_eq!(std::fs::metadata(dir.path().join("a/1.json")).unwrap().len(), 500);
    }

    #[tokio::test]
    async fn test_persistent_size_mismatch_fails_with_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 500]);
        store.set_fault(
            "a/1.json",
            Fault::Truncated {
                times: u32::MAX,
                deliver: 100,
            },
        );
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        match report.outcome {
            DownloadOutcome::Failed { error } => assert!(error.contains("size mismatch"), "{error}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.attempts, 3);
        assert!(!dir.path().join("a/1.json").exists());
        assert!(find_temp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_fails_without_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("../escape.json", vec![1u8; 3]);
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "../escape.json".into()).run().await;
        assert!(matches!(report.outcome, DownloadOutcome::Failed { .. }));
        assert_eq!(report.attempts, 0);
        assert_eq!(report.local_path, None);
        assert_eq!(store.head_calls("../escape.json"), 0);
        assert_eq!(ctx.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_permanent_filesystem_error_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("a/1.json", vec![5u8; 10]);
        // A directory squatting on the destination cannot go away by retrying.
        std::fs::create_dir_all(dir.path().join("a/1.json")).unwrap();
        let ctx = test_context(store.clone(), dir.path(), 3);

        let report = DownloadTask::new(&ctx, "a/1.json".into()).run().await;
        assert!(matches!(report.outcome, DownloadOutcome::Failed { .. }));
        assert_eq!(report.attempts, 1);
        assert_eq!(store.head_calls("a/1.json"), 1);
    }
}
