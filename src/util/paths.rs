//! Sibling paths derived from a storage file path

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Marker appended to the storage file name for in-flight writes.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Marker appended to the storage file name when a corrupt file is moved aside.
pub const BACKUP_MARKER: &str = ".corrupt-";

const FALLBACK_FILE_NAME: &str = "recordings";

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Get the temporary write path (`<name>.tmp`) next to the storage file
pub fn temp_path(path: &Path) -> PathBuf {
    path.with_file_name(format!("{}{TEMP_SUFFIX}", file_name(path)))
}

/// Get a fresh backup path (`<name>.corrupt-<timestamp>`) next to the storage file.
///
/// A numeric suffix is added only if a backup with the same timestamp already
/// exists, so an earlier backup is never overwritten.
pub fn backup_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let base = format!(
        "{}{BACKUP_MARKER}{}",
        file_name(path),
        at.format("%Y%m%dT%H%M%S%.3fZ")
    );
    let candidate = path.with_file_name(&base);
    if !candidate.exists() {
        return candidate;
    }

    (1u32..)
        .map(|n| path.with_file_name(format!("{base}-{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(candidate)
}
