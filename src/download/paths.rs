use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::error::DownloadError;

/// Suffix of in-progress downloads, next to the final path.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Map an object key onto the destination tree.
///
/// `strip_prefix` is removed from the key first when present. The rest is
/// split on `/`; empty and `.` components are dropped so `a//b` and `./a/b`
/// land on `a/b`. Keys that would escape the root (`..`) or that map onto
/// the root itself are rejected.
pub fn local_path_for_key(
    root: &Path,
    key: &str,
    strip_prefix: Option<&str>,
) -> Result<PathBuf, DownloadError> {
    let relative = strip_prefix
        .and_then(|prefix| key.strip_prefix(prefix))
        .unwrap_or(key);

    let mut path = root.to_path_buf();
    let mut components = 0usize;
    for component in relative.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(DownloadError::InvalidKey {
                    key: key.to_string(),
                    reason: "parent directory component",
                })
            }
            c => {
                path.push(c);
                components += 1;
            }
        }
    }

    if components == 0 {
        return Err(DownloadError::InvalidKey {
            key: key.to_string(),
            reason: "no path left after stripping prefix",
        });
    }
    Ok(path)
}

/// Temp path for a download: the final path with [`TEMP_SUFFIX`] appended,
/// so it lives in the same directory (and filesystem) as the final file.
pub fn temp_path_for(local_path: &Path) -> PathBuf {
    let mut name: OsString = local_path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}
