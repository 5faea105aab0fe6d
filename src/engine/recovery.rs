//! Startup cleanup of the staging area
//!
//! Transactions live only as long as the process that staged them. Any
//! request directory found under `<base>/tmp` when the store opens belongs to
//! a transaction that can no longer be committed, so it is removed.

use std::fs;

use tracing::warn;

use crate::errors::{StorageError, StorageResult};
use crate::observability::{log_event_with_fields, Event};
use crate::staging::StagingArea;

/// Outcome of a staging purge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Request directories removed
    pub removed: Vec<String>,
    /// Stray files (not request directories) removed
    pub stray_files: usize,
}

/// Remove every leftover request directory
pub fn purge_stale_staging(staging: &StagingArea) -> StorageResult<PurgeStats> {
    let root = staging.root();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PurgeStats::default()),
        Err(e) => return Err(StorageError::io("list", root, e)),
    };

    let mut stats = PurgeStats::default();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io("list", root, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| StorageError::io("purge", &path, e))?;
            stats.removed.push(name);
        } else {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "could not remove stray staging file");
                continue;
            }
            stats.stray_files += 1;
        }
    }
    stats.removed.sort();

    if !stats.removed.is_empty() || stats.stray_files > 0 {
        let requests = stats.removed.len().to_string();
        let stray_files = stats.stray_files.to_string();
        log_event_with_fields(
            Event::StagingPurged,
            &[
                ("requests", requests.as_str()),
                ("stray_files", stray_files.as_str()),
            ],
        );
    }
    Ok(stats)
}
