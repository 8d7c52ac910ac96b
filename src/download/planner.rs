//! Skip-or-download decision for a single key.
//!
//! No manifest of earlier runs is kept: the on-disk byte length compared to
//! the remote size is the whole idempotence story.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use super::error::DownloadError;
use super::paths;
use crate::store::{ObjectKey, ObjectMetadata, ObjectStore};

/// Where keys land locally.
#[derive(Debug, Clone)]
pub struct DestinationLayout {
    pub root: PathBuf,
    pub strip_prefix: Option<String>,
}

impl DestinationLayout {
    pub fn local_path(&self, key: &str) -> Result<PathBuf, DownloadError> {
        paths::local_path_for_key(&self.root, key, self.strip_prefix.as_deref())
    }
}

/// Split `keys` into those that can be mirrored side by side and those whose
/// files would collide with another key's.
///
/// A key conflicts when its local path was already claimed by an earlier key
/// (possible once a prefix is stripped), or when its temp file would land on
/// another key's final path (`x` next to `x.tmp`). Conflicting keys are
/// returned with a non-retryable [`DownloadError::InvalidKey`]. Keys that
/// don't map to a path at all are kept; their task reports the error.
pub fn partition_conflicts(
    layout: &DestinationLayout,
    keys: Vec<ObjectKey>,
) -> (Vec<ObjectKey>, Vec<(ObjectKey, DownloadError)>) {
    let mut owners: HashMap<PathBuf, usize> = HashMap::with_capacity(keys.len());
    let mut rejected: Vec<Option<&'static str>> = vec![None; keys.len()];
    let mut locals: Vec<Option<PathBuf>> = Vec::with_capacity(keys.len());

    for (idx, key) in keys.iter().enumerate() {
        let local = layout.local_path(key).ok();
        if let Some(path) = &local {
            if owners.contains_key(path) {
                rejected[idx] = Some("local path already used by another key");
            } else {
                owners.insert(path.clone(), idx);
            }
        }
        locals.push(local);
    }

    for (idx, local) in locals.iter().enumerate() {
        let Some(local) = local else { continue };
        if rejected[idx].is_some() {
            continue;
        }
        let temp = paths::temp_path_for(local);
        if let Some(&other) = owners.get(&temp) {
            tracing::warn!(
                key = %keys[idx],
                other = %keys[other],
                "Temp file would overwrite another key's file, not mirroring",
            );
            rejected[idx] = Some("temp path is another key's file");
        }
    }

    let mut kept = Vec::with_capacity(keys.len());
    let mut conflicts = Vec::new();
    for (key, reason) in keys.into_iter().zip(rejected) {
        match reason {
            None => kept.push(key),
            Some(reason) => {
                let err = DownloadError::InvalidKey {
                    key: key.clone(),
                    reason,
                };
                conflicts.push((key, err));
            }
        }
    }
    (kept, conflicts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Download,
    Skip,
}

/// Outcome of [`decide`]: what to do, where, and the remote metadata the
/// decision was based on. The size is what the transfer gets verified against.
#[derive(Debug, Clone)]
pub struct Plan {
    pub action: Action,
    pub local_path: PathBuf,
    pub remote: ObjectMetadata,
}

/// Decide whether `key` needs (re)downloading.
///
/// 1. map the key to its local path,
/// 2. look up the remote size (a failure here is an error, never a skip),
/// 3. absent locally: download,
/// 4. present: skip when the byte lengths match, otherwise download again.
///
/// Retrying is the caller's business.
pub async fn decide(
    store: &dyn ObjectStore,
    layout: &DestinationLayout,
    key: &str,
) -> Result<Plan, DownloadError> {
    let local_path = layout.local_path(key)?;

    let remote = store
        .head(key)
        .await
        .map_err(|source| DownloadError::Metadata {
            key: key.to_string(),
            source,
        })?;

    let action = match local_size(&local_path).await? {
        None => Action::Download,
        Some(size) if size == remote.size => Action::Skip,
        Some(size) => {
            tracing::warn!(
                key,
                local_bytes = size,
                remote_bytes = remote.size,
                "Size mismatch, downloading again"
            );
            Action::Download
        }
    };

    Ok(Plan {
        action,
        local_path,
        remote,
    })
}

/// Byte length of the file at `path`, or `None` if nothing is there.
async fn local_size(path: &Path) -> Result<Option<u64>, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Err(DownloadError::filesystem(
            path,
            io::Error::new(io::ErrorKind::IsADirectory, "destination is not a regular file"),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DownloadError::filesystem(path, e)),
    }
}
