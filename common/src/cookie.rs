//! Restart cookie and progress marker file formats.
//!
//! A restart cookie is written by a sink-side mover process as it runs and
//! lets a subsequent run resume a partially-completed shard. Its name and
//! content format are dictated by the external mover, not by us — we only
//! need to read the resume offset back out of it. The progress marker is
//! entirely our own: a newline-delimited list of destination paths that
//! have been fully transferred, used to skip already-complete files when a
//! whole-tree transfer is restarted.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::CorruptRestartError;

/// Extension used for restart cookie files, matching the mover's own
/// convention.
pub const RESTART_COOKIE_EXTENSION: &str = "xrf";

/// Filename (relative to the destination root) of the whole-tree transfer
/// progress marker.
pub const PROGRESS_FILENAME: &str = ".xddmcp.xpg";

/// Compute the restart cookie path for shard `shard_idx` of `shard_count`
/// shards writing to `dest_path`.
///
/// Format: `<dest_dir>/.<dest_basename>-<shard_idx>-<shard_count>.xrf`.
pub fn restart_cookie_path(dest_path: &Path, shard_idx: u64, shard_count: u64) -> PathBuf {
    let dir = dest_path.parent().unwrap_or_else(|| Path::new("."));
    let base = dest_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!(
        ".{base}-{shard_idx}-{shard_count}.{RESTART_COOKIE_EXTENSION}"
    ))
}

/// Read the resume offset out of a restart cookie.
///
/// The cookie's content is a single space-delimited line written by the
/// mover; the offset is the third whitespace-delimited token (index 2).
pub fn read_restart_offset(cookie_path: &Path) -> Result<u64, CorruptRestartError> {
    let content =
        std::fs::read_to_string(cookie_path).map_err(|e| CorruptRestartError::Corrupt {
            path: cookie_path.display().to_string(),
            reason: e.to_string(),
        })?;
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let offset_str = tokens.get(2).ok_or_else(|| CorruptRestartError::Corrupt {
        path: cookie_path.display().to_string(),
        reason: format!("expected at least 3 whitespace-delimited tokens, got {}", tokens.len()),
    })?;
    offset_str
        .parse::<u64>()
        .map_err(|e| CorruptRestartError::Corrupt {
            path: cookie_path.display().to_string(),
            reason: format!("offset token '{offset_str}' is not a valid integer: {e}"),
        })
}

/// Validate a restart offset against the known destination file size.
pub fn validate_restart_offset(offset: u64, dest_size: u64) -> Result<(), CorruptRestartError> {
    if offset > dest_size {
        return Err(CorruptRestartError::OffsetLargerThanDestination);
    }
    Ok(())
}

/// Remove a restart cookie, tolerating "already gone".
pub fn remove_restart_cookie(cookie_path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(cookie_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Path to the progress marker file under `dest_root`.
pub fn progress_marker_path(dest_root: &Path) -> PathBuf {
    dest_root.join(PROGRESS_FILENAME)
}

/// Append `dest_path` to the progress marker, recording it as complete.
pub fn mark_transfer_completed(dest_root: &Path, dest_path: &str) -> std::io::Result<()> {
    let marker = progress_marker_path(dest_root);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(marker)?;
    writeln!(file, "{dest_path}")
}

/// Check whether `dest_path` is already recorded as complete in the
/// progress marker. A missing marker file means nothing is complete yet.
pub fn transfer_is_complete(dest_root: &Path, dest_path: &str) -> bool {
    let marker = progress_marker_path(dest_root);
    let Ok(content) = std::fs::read_to_string(marker) else {
        return false;
    };
    content.lines().any(|line| line == dest_path)
}

/// Remove the progress marker entirely, called once a full-tree transfer
/// completes successfully.
pub fn remove_progress_marker(dest_root: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(progress_marker_path(dest_root)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_path_format() {
        let p = restart_cookie_path(Path::new("/dest/file.bin"), 2, 4);
        assert_eq!(p, PathBuf::from("/dest/.file.bin-2-4.xrf"));
    }

    #[test]
    fn restart_offset_is_third_token() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "0 1 4096 extra").unwrap();
        assert_eq!(read_restart_offset(tmp.path()).unwrap(), 4096);
    }

    #[test]
    fn restart_offset_rejects_short_cookie() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "0 1").unwrap();
        assert!(read_restart_offset(tmp.path()).is_err());
    }

    #[test]
    fn offset_validation() {
        assert!(validate_restart_offset(100, 200).is_ok());
        assert!(validate_restart_offset(300, 200).is_err());
    }

    #[test]
    fn progress_marker_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!transfer_is_complete(tmp.path(), "a/b.txt"));
        mark_transfer_completed(tmp.path(), "a/b.txt").unwrap();
        mark_transfer_completed(tmp.path(), "a/c.txt").unwrap();
        assert!(transfer_is_complete(tmp.path(), "a/b.txt"));
        assert!(transfer_is_complete(tmp.path(), "a/c.txt"));
        assert!(!transfer_is_complete(tmp.path(), "a/d.txt"));
        remove_progress_marker(tmp.path()).unwrap();
        assert!(!transfer_is_complete(tmp.path(), "a/b.txt"));
    }

    #[test]
    fn remove_restart_cookie_tolerates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        remove_restart_cookie(&tmp.path().join("nope.xrf")).unwrap();
    }
}
