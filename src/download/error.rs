use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Per-key download errors, classified for the retry loop.
///
/// None of these ever abort the run: once attempts are exhausted the key is
/// recorded as failed and the scheduler moves on.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("metadata lookup for {key} failed: {source}")]
    Metadata { key: String, source: StoreError },

    #[error("transfer of {key} failed after {bytes_written} bytes: {source}")]
    Transfer {
        key: String,
        bytes_written: u64,
        source: StoreError,
    },

    #[error("size mismatch for {key}: expected {expected} bytes, received {actual}")]
    Integrity {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem { path: PathBuf, source: io::Error },

    #[error("key {key} cannot be mirrored: {reason}")]
    InvalidKey { key: String, reason: &'static str },
}

impl DownloadError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is transient and worth retrying.
    ///
    /// Remote failures and size mismatches are always retried. Filesystem
    /// errors are retried unless the error kind cannot change between
    /// attempts (permissions, read-only mounts, a directory in the way).
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Metadata { .. } => true,
            DownloadError::Transfer { .. } => true,
            DownloadError::Integrity { .. } => true,
            DownloadError::Filesystem { source, .. } => !is_permanent_io(source.kind()),
            DownloadError::InvalidKey { .. } => false,
        }
    }
}

fn is_permanent_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::ReadOnlyFilesystem
            | io::ErrorKind::IsADirectory
            | io::ErrorKind::NotADirectory
            | io::ErrorKind::InvalidInput
    )
}
