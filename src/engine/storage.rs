//! # Content Storage Engine
//!
//! Orchestrates create/read/update/delete against the staging area and the
//! durable store, and finalizes staged transactions.
//!
//! Writes never touch the durable store directly: `create`, `update` and
//! `delete` only stage, and return a [`StagedTransaction`]. `commit` promotes
//! the staged changes (all or nothing), `rollback` discards them. Reads go
//! straight to the durable store and never see staged content.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::address;
use crate::content::{
    ContentItem, ContentUri, EmptySource, FileSource, GuessMimeResolver, Metacard, MimeResolver,
    MimeType,
};
use crate::errors::{StorageError, StorageResult};
use crate::observability::{log_event_with_fields, Event, MetricsSnapshot, StorageMetrics};
use crate::staging::{
    read_metadata, rendition_files, validate_request_id, RenditionMetadata, StagedChange,
    StagingArea, REFERENCE_SUFFIX,
};

use super::config::StorageConfig;
use super::locks::ContentLocks;
use super::recovery::purge_stale_staging;
use super::request::{CreateRequest, DeleteRequest, DeleteTarget, UpdateRequest};
use super::transaction::{
    StagedTransaction, TransactionKind, TransactionRegistry, TransactionState,
};

/// Filename used when the caller supplies none
pub const DEFAULT_FILENAME: &str = "content";

type StagedBatch = (Vec<ContentItem>, Vec<StagedChange>);

/// Names a batch will occupy inside one id directory
#[derive(Debug, Default)]
struct IdLayout {
    primary: Option<String>,
    qualifiers: HashSet<String>,
}

fn extension_of(filename: &str) -> Option<&str> {
    filename
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext)
}

/// Local-filesystem content store with staged, two-phase writes
#[derive(Debug)]
pub struct ContentStorage {
    config: StorageConfig,
    store_root: PathBuf,
    staging: StagingArea,
    mime: Arc<dyn MimeResolver>,
    registry: TransactionRegistry,
    locks: ContentLocks,
    metrics: StorageMetrics,
}

impl ContentStorage {
    /// Open a store using the default MIME resolver plus configured mappings
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let resolver = GuessMimeResolver::with_mappings(&config.mime_mappings);
        Self::open_with_resolver(config, Arc::new(resolver))
    }

    /// Open a store with a caller-provided MIME resolver
    pub fn open_with_resolver(
        config: StorageConfig,
        mime: Arc<dyn MimeResolver>,
    ) -> StorageResult<Self> {
        config.validate()?;

        let store_root = config.store_root();
        let staging_root = config.staging_root();
        for dir in [&store_root, &staging_root] {
            fs::create_dir_all(dir).map_err(|e| StorageError::io("create", dir, e))?;
        }

        let staging = StagingArea::new(staging_root, config.fsync);
        if config.purge_stale_staging {
            purge_stale_staging(&staging)?;
        }

        let base_dir = config.base_dir.display().to_string();
        log_event_with_fields(Event::StoreOpened, &[("base_dir", base_dir.as_str())]);

        let registry = TransactionRegistry::with_retention(config.retained_transactions);
        Ok(Self {
            config,
            store_root,
            staging,
            mime,
            registry,
            locks: ContentLocks::new(),
            metrics: StorageMetrics::new(),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Root of the durable store
    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// State of a request id, `None` if unknown.
    ///
    /// Finished transactions stay known until `retained_transactions` newer
    /// ones have finished.
    pub fn transaction_state(&self, request_id: &str) -> Option<TransactionState> {
        self.registry.state(request_id)
    }

    /// Request ids staged and not yet finalized
    pub fn pending_transactions(&self) -> Vec<String> {
        self.registry.pending()
    }

    // =========================================================================
    // Staging operations
    // =========================================================================

    /// Stage new content. Items without an id get a generated one.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub fn create(&self, request: CreateRequest) -> StorageResult<StagedTransaction> {
        let CreateRequest {
            request_id,
            items,
            properties,
        } = request;
        if items.is_empty() {
            return Err(StorageError::InvalidRequest("create request has no items".into()));
        }
        self.run_staging(TransactionKind::Create, request_id, properties, |rid| {
            self.stage_items(rid, TransactionKind::Create, items)
        })
    }

    /// Stage replacement content for existing ids
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub fn update(&self, request: UpdateRequest) -> StorageResult<StagedTransaction> {
        let UpdateRequest {
            request_id,
            items,
            properties,
        } = request;
        if items.is_empty() {
            return Err(StorageError::InvalidRequest("update request has no items".into()));
        }
        self.run_staging(TransactionKind::Update, request_id, properties, |rid| {
            self.stage_items(rid, TransactionKind::Update, items)
        })
    }

    /// Stage removal of stored content. Returned items have an empty filename.
    #[instrument(skip(self, request), fields(targets = request.targets.len()))]
    pub fn delete(&self, request: DeleteRequest) -> StorageResult<StagedTransaction> {
        let DeleteRequest {
            request_id,
            targets,
            properties,
        } = request;
        if targets.is_empty() {
            return Err(StorageError::InvalidRequest("delete request has no targets".into()));
        }
        self.run_staging(TransactionKind::Delete, request_id, properties, |rid| {
            self.stage_deletions(rid, targets)
        })
    }

    /// Reserve the request id, run `stage`, and discard everything on failure
    fn run_staging<F>(
        &self,
        kind: TransactionKind,
        request_id: Option<String>,
        properties: BTreeMap<String, String>,
        stage: F,
    ) -> StorageResult<StagedTransaction>
    where
        F: FnOnce(&str) -> StorageResult<StagedBatch>,
    {
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        validate_request_id(&request_id)?;
        self.registry.reserve(&request_id, kind)?;

        let staged = stage(&request_id)
            .and_then(|(items, changes)| {
                self.registry.mark_staged(&request_id, changes)?;
                Ok(items)
            });

        match staged {
            Ok(items) => {
                let count = items.len().to_string();
                let kind_name = kind.to_string();
                log_event_with_fields(
                    Event::TransactionStaged,
                    &[
                        ("request_id", request_id.as_str()),
                        ("kind", kind_name.as_str()),
                        ("items", count.as_str()),
                    ],
                );
                Ok(StagedTransaction::new(request_id, kind, items, properties))
            }
            Err(e) => {
                self.abandon_staging(&request_id, &e);
                Err(e)
            }
        }
    }

    fn abandon_staging(&self, request_id: &str, error: &StorageError) {
        if let Err(discard) = self.staging.discard(request_id) {
            warn!(request_id, error = %discard, "could not discard failed staging");
        }
        self.registry.abandon(request_id);
        self.metrics.increment_staging_failures();
        log_event_with_fields(
            Event::StagingFailed,
            &[("request_id", request_id), ("error", error.code())],
        );
    }

    fn stage_items(
        &self,
        request_id: &str,
        kind: TransactionKind,
        items: Vec<ContentItem>,
    ) -> StorageResult<StagedBatch> {
        let mut seen = HashSet::new();
        let mut id_layouts: HashMap<String, IdLayout> = HashMap::new();
        let mut staged_items = Vec::with_capacity(items.len());
        let mut changes = Vec::with_capacity(items.len());

        for mut item in items {
            let generated = item.id.is_empty();
            if generated {
                if kind == TransactionKind::Update {
                    return Err(StorageError::InvalidRequest(
                        "update items must carry an id".into(),
                    ));
                }
                item.id = ContentItem::generate_id();
            }
            address::validate_id(&item.id)?;
            address::validate_qualifier(&item.qualifier)?;

            let uri = item.uri();
            if !seen.insert((item.id.clone(), item.qualifier.clone())) {
                return Err(StorageError::InvalidRequest(format!(
                    "{} appears more than once in the request",
                    uri
                )));
            }

            if self.config.enforce_existence {
                let stored = self.is_stored(&item.id, &item.qualifier)?;
                match kind {
                    TransactionKind::Create if stored && !generated => {
                        return Err(StorageError::AlreadyExists(uri));
                    }
                    TransactionKind::Update if !stored => {
                        return Err(StorageError::NotStored(uri));
                    }
                    _ => {}
                }
            }

            let (mime_type, filename) = self.normalize(&item)?;
            let staged = if item.by_reference {
                let target = item.source.local_path().ok_or_else(|| {
                    StorageError::InvalidRequest(format!(
                        "{} is a reference but its source is not a local file",
                        uri
                    ))
                })?;
                self.staging
                    .stage_reference(request_id, &item.id, &item.qualifier, &filename, target)?
            } else {
                if filename.ends_with(REFERENCE_SUFFIX) {
                    return Err(StorageError::InvalidRequest(format!(
                        "filename '{}' uses the reserved {} suffix",
                        filename, REFERENCE_SUFFIX
                    )));
                }
                self.staging.stage(
                    request_id,
                    &item.id,
                    &item.qualifier,
                    &filename,
                    item.source.as_ref(),
                )?
            };
            self.metrics.record_staged(staged.size);

            let metadata = self.staging.stage_metadata(
                request_id,
                &item.id,
                &item.qualifier,
                &RenditionMetadata {
                    mime_type: mime_type.to_string(),
                    filename: filename.clone(),
                    checksum: staged.checksum.clone(),
                    stored_at: Utc::now(),
                },
            )?;

            let stored_name = staged
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let layout = id_layouts.entry(item.id.clone()).or_default();
            if item.qualifier.is_empty() {
                layout.primary = Some(stored_name);
            } else {
                layout.qualifiers.insert(item.qualifier.clone());
            }

            changes.push(StagedChange::Put {
                uri,
                id: item.id.clone(),
                staged: staged.path,
                metadata,
                durable_dir: address::rendition_dir(&self.store_root, &item.id, &item.qualifier)?,
            });

            item.mime_type = mime_type.to_string();
            item.filename = filename;
            item.size = staged.size;
            item.checksum = Some(staged.checksum);
            staged_items.push(item);
        }

        for (id, layout) in &id_layouts {
            self.check_layout(id, layout)?;
        }

        Ok((staged_items, changes))
    }

    /// Reject a primary file and a qualifier directory that would share a name
    /// under one id directory, within the batch or against durable state
    fn check_layout(&self, id: &str, layout: &IdLayout) -> StorageResult<()> {
        let id_dir = address::rendition_dir(&self.store_root, id, "")?;
        if let Some(primary) = &layout.primary {
            if layout.qualifiers.contains(primary) || id_dir.join(primary).is_dir() {
                return Err(StorageError::InvalidRequest(format!(
                    "filename '{}' of content:{} collides with a qualifier of the same id",
                    primary, id
                )));
            }
        }
        for qualifier in &layout.qualifiers {
            if id_dir.join(qualifier).is_file() {
                return Err(StorageError::InvalidRequest(format!(
                    "qualifier '{}' of content:{} collides with its stored filename",
                    qualifier, id
                )));
            }
        }
        Ok(())
    }

    fn stage_deletions(&self, request_id: &str, targets: Vec<DeleteTarget>) -> StorageResult<StagedBatch> {
        let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
        let mut deleted_items = Vec::new();
        let mut changes = Vec::with_capacity(targets.len());

        for target in targets {
            let id = target.metacard.id().to_string();
            address::validate_id(&id)?;
            if let Some(qualifier) = &target.qualifier {
                address::validate_qualifier(qualifier)?;
            }

            let overlaps = seen.iter().any(|(seen_id, seen_q)| {
                *seen_id == id
                    && (seen_q.is_none() || target.qualifier.is_none() || *seen_q == target.qualifier)
            });
            if overlaps {
                return Err(StorageError::InvalidRequest(format!(
                    "content:{} is targeted more than once in the request",
                    id
                )));
            }
            seen.insert((id.clone(), target.qualifier.clone()));

            let uri = match target.qualifier.as_deref() {
                None | Some("") => format!("content:{}", id),
                Some(q) => format!("content:{}#{}", id, q),
            };
            let id_dir = self
                .find_stored(&id)?
                .ok_or_else(|| StorageError::NotFound(uri.clone()))?;

            let renditions = match &target.qualifier {
                None => self.stored_renditions(&id_dir)?,
                Some(qualifier) => {
                    let dir = address::rendition_dir(&self.store_root, &id, qualifier)?;
                    rendition_files(&dir)?
                        .into_iter()
                        .take(1)
                        .map(|file| (qualifier.clone(), file))
                        .collect()
                }
            };
            if renditions.is_empty() {
                return Err(StorageError::NotFound(uri));
            }

            let qualifier = target.qualifier.clone().unwrap_or_default();
            self.staging.mark_deleted(request_id, &id, &qualifier)?;
            self.metrics.increment_deletions_staged();
            debug!(request_id, uri = %uri, renditions = renditions.len(), "staged deletion");

            changes.push(StagedChange::Remove {
                uri,
                id: id.clone(),
                durable_dir: address::rendition_dir(&self.store_root, &id, &qualifier)?,
                id_dir,
                whole: target.qualifier.is_none(),
            });
            for (qualifier, file) in renditions {
                deleted_items.push(self.deleted_item(&id, &qualifier, &file, &target.metacard));
            }
        }

        Ok((deleted_items, changes))
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Promote a staged transaction into the durable store.
    ///
    /// Returns the committed items. On failure nothing is promoted and the
    /// transaction ends rolled back.
    pub fn commit(&self, transaction: StagedTransaction) -> StorageResult<Vec<ContentItem>> {
        self.commit_request(transaction.request_id())?;
        Ok(transaction.into_items())
    }

    /// Commit by request id
    #[instrument(skip(self))]
    pub fn commit_request(&self, request_id: &str) -> StorageResult<()> {
        let (kind, changes) = self.registry.begin_finalize(request_id)?;

        let promoted = self
            .locks
            .acquire(changes.iter().map(StagedChange::id))
            .and_then(|_guard| {
                self.staging
                    .promote(request_id, &changes)
                    .map_err(|failure| StorageError::CommitFailed {
                        request_id: request_id.to_string(),
                        failed: changes
                            .get(failure.index)
                            .map(|c| vec![c.uri().to_string()])
                            .unwrap_or_default(),
                        source: Box::new(failure.source),
                    })
            });

        if let Err(e) = self.staging.discard(request_id) {
            warn!(request_id, error = %e, "could not clear staging after commit");
        }

        let kind_name = kind.to_string();
        let count = changes.len().to_string();
        let fields = [
            ("request_id", request_id),
            ("kind", kind_name.as_str()),
            ("changes", count.as_str()),
        ];
        match promoted {
            Ok(()) => {
                self.registry.finish(request_id, TransactionState::Committed);
                self.metrics.increment_commits();
                log_event_with_fields(Event::TransactionCommitted, &fields);
                Ok(())
            }
            Err(e) => {
                self.registry.finish(request_id, TransactionState::RolledBack);
                self.metrics.increment_commit_failures();
                log_event_with_fields(Event::CommitAborted, &fields);
                Err(e)
            }
        }
    }

    /// Discard a staged transaction without touching the durable store
    pub fn rollback(&self, transaction: StagedTransaction) -> StorageResult<()> {
        self.rollback_request(transaction.request_id())
    }

    /// Roll back by request id
    #[instrument(skip(self))]
    pub fn rollback_request(&self, request_id: &str) -> StorageResult<()> {
        let (kind, _changes) = self.registry.begin_finalize(request_id)?;
        let discarded = self.staging.discard(request_id);
        self.registry.finish(request_id, TransactionState::RolledBack);
        self.metrics.increment_rollbacks();

        let kind_name = kind.to_string();
        log_event_with_fields(
            Event::TransactionRolledBack,
            &[("request_id", request_id), ("kind", kind_name.as_str())],
        );
        discarded
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read committed content by URI (`content:<id>[#<qualifier>]`)
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, uri: &str) -> StorageResult<ContentItem> {
        let result = self.read_durable(uri);
        self.metrics
            .record_read(!matches!(result, Err(StorageError::NotFound(_))));
        result
    }

    fn read_durable(&self, raw_uri: &str) -> StorageResult<ContentItem> {
        let uri = ContentUri::parse(raw_uri)?;
        let dir = address::rendition_dir(&self.store_root, uri.id(), uri.qualifier())?;
        let file = rendition_files(&dir)?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))?;

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (filename, source_path, by_reference) = match name.strip_suffix(REFERENCE_SUFFIX) {
            Some(stem) => {
                let target = fs::read_to_string(&file).map_err(|e| {
                    StorageError::io_or_not_found("read reference", &file, &uri.to_string(), e)
                })?;
                (stem.to_string(), PathBuf::from(target.trim_end()), true)
            }
            None => (name.clone(), file, false),
        };

        let meta = fs::metadata(&source_path).map_err(|e| {
            StorageError::io_or_not_found("stat", &source_path, &uri.to_string(), e)
        })?;

        // The sidecar holds the type as staged; without one, fall back to the extension
        let (mime_type, checksum) = match read_metadata(&dir)? {
            Some(stored) if stored.filename == filename => (stored.mime_type, Some(stored.checksum)),
            _ => (self.mime_for_filename(&filename).to_string(), None),
        };

        Ok(ContentItem {
            id: uri.id().to_string(),
            qualifier: uri.qualifier().to_string(),
            mime_type,
            filename,
            size: meta.len(),
            checksum,
            properties: Default::default(),
            by_reference,
            source: Arc::new(FileSource::new(source_path)),
            metacard: None,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Canonical MIME type and normalized filename for an incoming item
    fn normalize(&self, item: &ContentItem) -> StorageResult<(MimeType, String)> {
        let raw_name = if item.filename.trim().is_empty() {
            item.source
                .local_path()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
        } else {
            item.filename.clone()
        };
        let mut filename = address::normalize_filename(&raw_name)?;

        if item.mime_type.trim().is_empty() {
            return Ok((self.mime_for_filename(&filename), filename));
        }

        let resolved = self.mime.resolve(&item.mime_type).ok_or_else(|| {
            StorageError::InvalidRequest(format!("malformed MIME type '{}'", item.mime_type))
        })?;

        if let Some(preferred) = &resolved.preferred_extension {
            let renamed = match extension_of(&filename) {
                None => Some(format!("{}.{}", filename, preferred)),
                Some(ext) => {
                    if self.mime.accepts_extension(resolved.mime_type.base(), ext) {
                        None
                    } else {
                        let stem = &filename[..filename.len() - ext.len() - 1];
                        Some(format!("{}.{}", stem, preferred))
                    }
                }
            };
            if let Some(renamed) = renamed {
                debug!(from = %filename, to = %renamed, mime = %resolved.mime_type, "normalized filename");
                filename = renamed;
            }
        }

        Ok((resolved.mime_type, filename))
    }

    fn mime_for_filename(&self, filename: &str) -> MimeType {
        extension_of(filename)
            .and_then(|ext| self.mime.type_for_extension(ext))
            .unwrap_or_else(MimeType::octet_stream)
    }

    /// Durable directory of exactly `id`, found by full-name comparison
    fn find_stored(&self, id: &str) -> StorageResult<Option<PathBuf>> {
        let parent = address::shard_path(id)?.parent_under(&self.store_root);
        let entries = match fs::read_dir(&parent) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io("list", &parent, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("list", &parent, e))?;
            if entry.file_name().as_os_str() == OsStr::new(id) && entry.path().is_dir() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Every stored rendition under an id directory: primary first, then qualifiers
    fn stored_renditions(&self, id_dir: &Path) -> StorageResult<Vec<(String, PathBuf)>> {
        let mut renditions: Vec<(String, PathBuf)> = rendition_files(id_dir)?
            .into_iter()
            .take(1)
            .map(|file| (String::new(), file))
            .collect();

        let entries = fs::read_dir(id_dir).map_err(|e| StorageError::io("list", id_dir, e))?;
        let mut qualified = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("list", id_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            if let Some(file) = rendition_files(&entry.path())?.into_iter().next() {
                qualified.push((name, file));
            }
        }
        qualified.sort();
        renditions.extend(qualified);
        Ok(renditions)
    }

    fn is_stored(&self, id: &str, qualifier: &str) -> StorageResult<bool> {
        let dir = address::rendition_dir(&self.store_root, id, qualifier)?;
        Ok(!rendition_files(&dir)?.is_empty())
    }

    fn deleted_item(
        &self,
        id: &str,
        qualifier: &str,
        file: &Path,
        metacard: &Arc<dyn Metacard>,
    ) -> ContentItem {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stored_name = name.strip_suffix(REFERENCE_SUFFIX).unwrap_or(&name);
        let stored = file
            .parent()
            .and_then(|dir| read_metadata(dir).ok().flatten())
            .filter(|stored| stored.filename == stored_name);
        let mime_type = match stored {
            Some(stored) => stored.mime_type,
            None => self.mime_for_filename(stored_name).to_string(),
        };
        ContentItem {
            id: id.to_string(),
            qualifier: qualifier.to_string(),
            mime_type,
            filename: String::new(),
            size: 0,
            checksum: None,
            properties: Default::default(),
            by_reference: name.ends_with(REFERENCE_SUFFIX),
            source: Arc::new(EmptySource),
            metacard: Some(Arc::clone(metacard)),
        }
    }
}
