use std::io;
use std::path::Path;

use futures_util::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use crate::store::ObjectStore;

/// Stream `key` into `temp_path`, returning the number of bytes written.
///
/// The temp file is truncated first, so a leftover from an earlier crashed
/// run never gets appended to. Missing parent directories are created.
pub(crate) async fn stream_to_temp(
    store: &dyn ObjectStore,
    key: &str,
    temp_path: &Path,
) -> Result<u64, DownloadError> {
    if let Some(parent) = temp_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::filesystem(parent, e))?;
    }

    let mut body = store
        .get(key)
        .await
        .map_err(|source| DownloadError::Transfer {
            key: key.to_string(),
            bytes_written: 0,
            source,
        })?;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp_path)
        .await
        .map_err(|e| DownloadError::filesystem(temp_path, e))?;

    let mut bytes_written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| {
            tracing::debug!(key, bytes_written, "Body stream error: {}", source);
            DownloadError::Transfer {
                key: key.to_string(),
                bytes_written,
                source,
            }
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::filesystem(temp_path, e))?;
        bytes_written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| DownloadError::filesystem(temp_path, e))?;
    // Data must be on disk before the rename makes it visible.
    file.sync_all()
        .await
        .map_err(|e| DownloadError::filesystem(temp_path, e))?;

    Ok(bytes_written)
}

/// Length of the temp file as it sits on disk.
pub(crate) async fn file_len(path: &Path) -> Result<u64, DownloadError> {
    fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|e| DownloadError::filesystem(path, e))
}

/// Compare the on-disk length against the size captured at decision time.
pub(crate) fn verify_size(key: &str, expected: u64, actual: u64) -> Result<(), DownloadError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DownloadError::Integrity {
            key: key.to_string(),
            expected,
            actual,
        })
    }
}

/// Move a verified temp file onto its final path.
///
/// A rename within one directory is atomic, so readers see either the old
/// file or the complete new one.
pub(crate) async fn publish(temp_path: &Path, local_path: &Path) -> Result<(), DownloadError> {
    // Windows refuses to rename over an existing file.
    #[cfg(windows)]
    match fs::remove_file(local_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(DownloadError::filesystem(local_path, e)),
    }

    fs::rename(temp_path, local_path)
        .await
        .map_err(|e| DownloadError::filesystem(local_path, e))
}

/// Best-effort removal of a temp artifact.
pub(crate) async fn remove_temp(temp_path: &Path) {
    match fs::remove_file(temp_path).await {
        Ok(()) => tracing::debug!("Removed {}", temp_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove {}: {}", temp_path.display(), e),
    }
}
