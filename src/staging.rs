//! # Staging Area
//!
//! Per-request scratch space under `<base>/tmp/<requestId>/`. Staged files
//! mirror the durable layout below the request directory:
//!
//! ```text
//! <base>/tmp/<requestId>/<seg1>/<seg2>/<seg3>/[<qualifier>/]<filename>
//! ```
//!
//! Writes go to a hidden sibling and are renamed into place only after the
//! whole source has been copied, so a failed write never leaves a visible
//! partial file. Promotion into the durable store is all-or-nothing: existing
//! durable files are moved aside into `<requestId>/.backup/` first and put
//! back if any later step fails.
//!
//! Every durable rendition directory holds one visible file and a hidden
//! [`METADATA_FILE`] sidecar recording the canonical MIME type and checksum.
//! The sidecar travels with its file through staging, promotion and undo.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::address;
use crate::content::ByteSource;
use crate::errors::{StorageError, StorageResult};

/// Directory under the base directory that holds all staging
pub const STAGING_DIR: &str = "tmp";

/// Per-request directory holding durable files moved aside during commit
pub const BACKUP_DIR: &str = ".backup";

/// Suffix of files that store a path to externally owned content
pub const REFERENCE_SUFFIX: &str = ".ref";

/// Marker written into a staged rendition directory that is pending removal
pub const DELETE_MARKER: &str = ".pending-delete";

/// Hidden sidecar next to each rendition file
pub const METADATA_FILE: &str = ".rendition.json";

const COPY_BUFFER: usize = 64 * 1024;

/// Contents of a rendition's [`METADATA_FILE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionMetadata {
    /// Canonical MIME type, parameters included
    pub mime_type: String,
    pub filename: String,
    /// SHA-256 hex of the content
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
}

/// Read the sidecar of a rendition directory. `None` when there is none.
pub fn read_metadata(dir: &Path) -> StorageResult<Option<RenditionMetadata>> {
    let path = dir.join(METADATA_FILE);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io("read", &path, e)),
    };
    serde_json::from_slice(&raw).map(Some).map_err(|e| {
        StorageError::Internal(format!("corrupt rendition metadata {}: {}", path.display(), e))
    })
}

/// A file written into the staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Bytes of content represented (the target's size for references)
    pub size: u64,
    /// SHA-256 hex of the content
    pub checksum: String,
}

/// One durable change waiting for commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedChange {
    /// Replace whatever rendition lives in `durable_dir` with `staged` and its sidecar
    Put {
        uri: String,
        id: String,
        staged: PathBuf,
        metadata: PathBuf,
        durable_dir: PathBuf,
    },
    /// Remove the rendition in `durable_dir`, or the whole id directory when `whole`
    Remove {
        uri: String,
        id: String,
        durable_dir: PathBuf,
        id_dir: PathBuf,
        whole: bool,
    },
}

impl StagedChange {
    pub fn uri(&self) -> &str {
        match self {
            StagedChange::Put { uri, .. } | StagedChange::Remove { uri, .. } => uri,
        }
    }

    /// Content id the change touches; changes on one id are serialized
    pub fn id(&self) -> &str {
        match self {
            StagedChange::Put { id, .. } | StagedChange::Remove { id, .. } => id,
        }
    }
}

/// Promotion failed at `index`; everything before it was undone
#[derive(Debug)]
pub struct PromoteFailure {
    pub index: usize,
    pub source: StorageError,
}

enum Undo {
    Restore { backup: PathBuf, original: PathBuf },
    Remove(PathBuf),
}

/// Validate a request id for use as a directory name
pub fn validate_request_id(request_id: &str) -> StorageResult<()> {
    let ok = !request_id.is_empty()
        && request_id.len() <= address::MAX_ID_LEN
        && request_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidRequest(format!(
            "request id '{}' must be 1..={} characters of [A-Za-z0-9_-]",
            request_id,
            address::MAX_ID_LEN
        )))
    }
}

/// Regular, non-hidden files directly inside a rendition directory, sorted.
/// A missing directory has no files.
pub fn rendition_files(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io("list", dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io("list", dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| StorageError::io("stat", &entry.path(), e))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if file_type.is_file() && !hidden {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Copy `reader` into `writer`, returning the byte count and SHA-256 hex
fn copy_hashing(reader: &mut dyn Read, writer: &mut impl Write) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Transaction-scoped staging area
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    fsync: bool,
}

impl StagingArea {
    /// `root` is `<base>/tmp`
    pub fn new(root: impl Into<PathBuf>, fsync: bool) -> Self {
        Self {
            root: root.into(),
            fsync,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<requestId>`
    pub fn request_dir(&self, request_id: &str) -> StorageResult<PathBuf> {
        validate_request_id(request_id)?;
        Ok(self.root.join(request_id))
    }

    /// Staged location of one rendition's directory
    pub fn rendition_dir(&self, request_id: &str, id: &str, qualifier: &str) -> StorageResult<PathBuf> {
        address::rendition_dir(&self.request_dir(request_id)?, id, qualifier)
    }

    /// Copy a byte source into the staging area
    pub fn stage(
        &self,
        request_id: &str,
        id: &str,
        qualifier: &str,
        filename: &str,
        source: &dyn ByteSource,
    ) -> StorageResult<StagedFile> {
        let dest = address::storage_path(&self.request_dir(request_id)?, id, qualifier, filename)?;
        let mut reader = source
            .open()
            .map_err(|e| StorageError::io("open source for", &dest, e))?;
        let (size, checksum) = self.write_atomic(&dest, &mut *reader)?;
        debug!(request_id, id, qualifier, path = %dest.display(), size, "staged content");
        Ok(StagedFile {
            path: dest,
            size,
            checksum,
        })
    }

    /// Stage a reference file `<filename>.ref` pointing at `target`
    pub fn stage_reference(
        &self,
        request_id: &str,
        id: &str,
        qualifier: &str,
        filename: &str,
        target: &Path,
    ) -> StorageResult<StagedFile> {
        let target = fs::canonicalize(target).map_err(|e| {
            StorageError::io_or_not_found(
                "resolve reference",
                target,
                &target.display().to_string(),
                e,
            )
        })?;
        let mut body = File::open(&target).map_err(|e| StorageError::io("open", &target, e))?;
        let (size, checksum) = copy_hashing(&mut body, &mut io::sink())
            .map_err(|e| StorageError::io("read", &target, e))?;

        let ref_name = format!("{}{}", filename, REFERENCE_SUFFIX);
        let dest = address::storage_path(&self.request_dir(request_id)?, id, qualifier, &ref_name)?;
        let target_text = target.to_string_lossy().into_owned();
        self.write_atomic(&dest, &mut target_text.as_bytes())?;
        debug!(request_id, id, qualifier, target = %target.display(), "staged reference");
        Ok(StagedFile {
            path: dest,
            size,
            checksum,
        })
    }

    /// Write the sidecar for a staged rendition
    pub fn stage_metadata(
        &self,
        request_id: &str,
        id: &str,
        qualifier: &str,
        metadata: &RenditionMetadata,
    ) -> StorageResult<PathBuf> {
        let dest = self.rendition_dir(request_id, id, qualifier)?.join(METADATA_FILE);
        let body = serde_json::to_vec_pretty(metadata)
            .map_err(|e| StorageError::Internal(format!("encode rendition metadata: {}", e)))?;
        self.write_atomic(&dest, &mut body.as_slice())?;
        Ok(dest)
    }

    /// Leave a deletion marker in the staged rendition directory
    pub fn mark_deleted(&self, request_id: &str, id: &str, qualifier: &str) -> StorageResult<PathBuf> {
        let dir = self.rendition_dir(request_id, id, qualifier)?;
        fs::create_dir_all(&dir).map_err(|e| StorageError::io("create", &dir, e))?;
        let marker = dir.join(DELETE_MARKER);
        File::create(&marker).map_err(|e| StorageError::io("create", &marker, e))?;
        Ok(marker)
    }

    /// Write `reader` to `dest` through a hidden sibling, renamed on success.
    /// The sibling is removed on every failure path.
    fn write_atomic(&self, dest: &Path, reader: &mut dyn Read) -> StorageResult<(u64, String)> {
        let parent = dest
            .parent()
            .ok_or_else(|| StorageError::Internal(format!("{} has no parent", dest.display())))?;
        fs::create_dir_all(parent).map_err(|e| StorageError::io("create", parent, e))?;

        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.{}.partial", name, Uuid::new_v4().simple()));

        let written = (|| -> io::Result<(u64, String)> {
            let mut file = File::create(&temp)?;
            let result = copy_hashing(reader, &mut file)?;
            file.flush()?;
            if self.fsync {
                file.sync_all()?;
            }
            Ok(result)
        })();

        let result = match written {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(StorageError::io("write", dest, e));
            }
        };

        if let Err(e) = fs::rename(&temp, dest) {
            let _ = fs::remove_file(&temp);
            return Err(StorageError::io("rename into", dest, e));
        }
        Ok(result)
    }

    /// Move every staged change into the durable store.
    ///
    /// Either all changes land or none do. On failure the durable store is
    /// returned to its prior state and the failing change index is reported.
    pub fn promote(&self, request_id: &str, changes: &[StagedChange]) -> Result<(), PromoteFailure> {
        let backup_root = self
            .request_dir(request_id)
            .map_err(|source| PromoteFailure { index: 0, source })?
            .join(BACKUP_DIR);

        let mut journal = Vec::new();
        for (index, change) in changes.iter().enumerate() {
            let backup = backup_root.join(index.to_string());
            if let Err(source) = Self::apply(change, &backup, &mut journal) {
                warn!(request_id, uri = change.uri(), error = %source, "promotion failed, undoing");
                Self::undo(journal);
                return Err(PromoteFailure { index, source });
            }
        }

        // Drop directories emptied by removals
        for change in changes {
            if let StagedChange::Remove {
                durable_dir,
                id_dir,
                whole: false,
                ..
            } = change
            {
                let _ = fs::remove_dir(durable_dir);
                let _ = fs::remove_dir(id_dir);
            }
        }
        Ok(())
    }

    fn apply(change: &StagedChange, backup: &Path, journal: &mut Vec<Undo>) -> StorageResult<()> {
        match change {
            StagedChange::Put {
                staged,
                metadata,
                durable_dir,
                ..
            } => {
                Self::set_aside(durable_dir, backup, journal)?;
                fs::create_dir_all(durable_dir)
                    .map_err(|e| StorageError::io("create", durable_dir, e))?;
                let name = staged.file_name().ok_or_else(|| {
                    StorageError::Internal(format!("{} has no file name", staged.display()))
                })?;
                for (from, to) in [
                    (staged, durable_dir.join(name)),
                    (metadata, durable_dir.join(METADATA_FILE)),
                ] {
                    fs::rename(from, &to).map_err(|e| StorageError::io("promote", &to, e))?;
                    journal.push(Undo::Remove(to));
                }
                Ok(())
            }
            StagedChange::Remove {
                uri,
                durable_dir,
                whole: true,
                ..
            } => {
                if !durable_dir.is_dir() {
                    return Err(StorageError::NotFound(uri.clone()));
                }
                fs::create_dir_all(backup).map_err(|e| StorageError::io("create", backup, e))?;
                let dest = backup.join("rendition");
                fs::rename(durable_dir, &dest)
                    .map_err(|e| StorageError::io("remove", durable_dir, e))?;
                journal.push(Undo::Restore {
                    backup: dest,
                    original: durable_dir.clone(),
                });
                Ok(())
            }
            StagedChange::Remove {
                uri,
                durable_dir,
                whole: false,
                ..
            } => {
                if Self::set_aside(durable_dir, backup, journal)? == 0 {
                    return Err(StorageError::NotFound(uri.clone()));
                }
                Ok(())
            }
        }
    }

    /// Move the rendition files of `dir` and its sidecar into `backup`,
    /// journaling each move. Returns the number of rendition files moved.
    fn set_aside(dir: &Path, backup: &Path, journal: &mut Vec<Undo>) -> StorageResult<usize> {
        let files = rendition_files(dir)?;
        let sidecar = dir.join(METADATA_FILE);
        let mut moves = files.clone();
        if !files.is_empty() && sidecar.is_file() {
            moves.push(sidecar);
        }
        for file in &moves {
            fs::create_dir_all(backup).map_err(|e| StorageError::io("create", backup, e))?;
            let name = file.file_name().ok_or_else(|| {
                StorageError::Internal(format!("{} has no file name", file.display()))
            })?;
            let dest = backup.join(name);
            fs::rename(file, &dest).map_err(|e| StorageError::io("set aside", file, e))?;
            journal.push(Undo::Restore {
                backup: dest,
                original: file.clone(),
            });
        }
        Ok(files.len())
    }

    fn undo(journal: Vec<Undo>) {
        for step in journal.into_iter().rev() {
            match step {
                Undo::Remove(path) => {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "could not remove promoted file");
                    }
                }
                Undo::Restore { backup, original } => {
                    if let Some(parent) = original.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    if let Err(e) = fs::rename(&backup, &original) {
                        warn!(
                            backup = %backup.display(),
                            original = %original.display(),
                            error = %e,
                            "could not restore durable file"
                        );
                    }
                }
            }
        }
    }

    /// Remove everything staged for a request. Missing is fine.
    pub fn discard(&self, request_id: &str) -> StorageResult<()> {
        let dir = self.request_dir(request_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io("discard", &dir, e)),
        }
    }

    /// Request ids that currently have a staging directory
    pub fn staged_requests(&self) -> StorageResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io("list", &self.root, e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("list", &self.root, e))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
