//! # Content Address Resolver
//!
//! Maps a content identifier (plus optional qualifier and filename) to a
//! relative location under a store root:
//!
//! ```text
//! <root>/<id[0..3]>/<id[3..6]>/<id>/[<qualifier>/]<filename>
//! ```
//!
//! The first two segments bound directory fan-out. The third segment is the
//! complete identifier, so ids that share a prefix never share a leaf
//! directory. Everything here is pure: no I/O, no randomness.

use std::path::{Path, PathBuf};

use crate::errors::{StorageError, StorageResult};

/// Width of each of the two fan-out segments
pub const SEGMENT_WIDTH: usize = 3;

/// Shortest accepted identifier
pub const MIN_ID_LEN: usize = SEGMENT_WIDTH * 2;

/// Longest accepted identifier
pub const MAX_ID_LEN: usize = 128;

/// Longest accepted qualifier
pub const MAX_QUALIFIER_LEN: usize = 64;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Three-segment shard location derived from an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardPath<'a> {
    first: &'a str,
    second: &'a str,
    leaf: &'a str,
}

impl<'a> ShardPath<'a> {
    /// The three segments in order
    pub fn segments(&self) -> [&'a str; 3] {
        [self.first, self.second, self.leaf]
    }

    /// Directory holding every identifier that shares this shard's prefix
    pub fn parent_under(&self, root: &Path) -> PathBuf {
        root.join(self.first).join(self.second)
    }

    /// Directory owned by this identifier
    pub fn join_under(&self, root: &Path) -> PathBuf {
        self.parent_under(root).join(self.leaf)
    }
}

/// Validate a content identifier
pub fn validate_id(id: &str) -> StorageResult<()> {
    if id.is_empty() {
        return Err(StorageError::InvalidIdentifier("empty identifier".into()));
    }
    if id.len() < MIN_ID_LEN || id.len() > MAX_ID_LEN {
        return Err(StorageError::InvalidIdentifier(format!(
            "identifier '{}' must be {}..={} characters",
            id, MIN_ID_LEN, MAX_ID_LEN
        )));
    }
    if !id.chars().all(is_id_char) {
        return Err(StorageError::InvalidIdentifier(format!(
            "identifier '{}' contains characters outside [A-Za-z0-9_-]",
            id
        )));
    }
    Ok(())
}

/// Validate a qualifier. The empty qualifier names the primary rendition.
pub fn validate_qualifier(qualifier: &str) -> StorageResult<()> {
    if qualifier.is_empty() {
        return Ok(());
    }
    if qualifier.len() > MAX_QUALIFIER_LEN || !qualifier.chars().all(is_id_char) {
        return Err(StorageError::InvalidIdentifier(format!(
            "qualifier '{}' must be at most {} characters of [A-Za-z0-9_-]",
            qualifier, MAX_QUALIFIER_LEN
        )));
    }
    Ok(())
}

/// Reduce a caller-supplied filename to a single safe path component.
///
/// Directory parts (either separator) are dropped. Hidden names are
/// rejected because the store uses dot-prefixed names for its own
/// bookkeeping files.
pub fn normalize_filename(raw: &str) -> StorageResult<String> {
    let name = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();

    if name.is_empty() || name == "." || name == ".." || name.starts_with('.') {
        return Err(StorageError::InvalidRequest(format!(
            "unusable filename '{}'",
            raw
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(StorageError::InvalidRequest(format!(
            "filename '{}' contains control characters",
            raw
        )));
    }
    Ok(name.to_string())
}

/// Compute the shard path for an identifier
pub fn shard_path(id: &str) -> StorageResult<ShardPath<'_>> {
    validate_id(id)?;
    Ok(ShardPath {
        first: &id[..SEGMENT_WIDTH],
        second: &id[SEGMENT_WIDTH..SEGMENT_WIDTH * 2],
        leaf: id,
    })
}

/// Directory holding one rendition (`qualifier == ""` for the primary)
pub fn rendition_dir(root: &Path, id: &str, qualifier: &str) -> StorageResult<PathBuf> {
    validate_qualifier(qualifier)?;
    let dir = shard_path(id)?.join_under(root);
    if qualifier.is_empty() {
        Ok(dir)
    } else {
        Ok(dir.join(qualifier))
    }
}

/// Full path of a stored file
pub fn storage_path(
    root: &Path,
    id: &str,
    qualifier: &str,
    filename: &str,
) -> StorageResult<PathBuf> {
    let filename = normalize_filename(filename)?;
    Ok(rendition_dir(root, id, qualifier)?.join(filename))
}
