//! Staged transactions and their lifecycle
//!
//! ```text
//! STAGING ──> STAGED ──commit──> COMMITTED
//!                └────rollback──> ROLLED_BACK
//! ```
//!
//! Both outcomes are terminal. A [`StagedTransaction`] is consumed by commit
//! or rollback, so finalizing the same value twice does not compile. The
//! registry tracks live request ids and a bounded window of finished ones so
//! that finalizing by id, or reusing an id, is rejected at runtime.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::ContentItem;
use crate::errors::{StorageError, StorageResult};
use crate::staging::StagedChange;

/// Operation that produced a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionKind::Create => "create",
            TransactionKind::Update => "update",
            TransactionKind::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// Externally visible transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Items are still being written; not yet finalizable
    Staging,
    Staged,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

/// Result of a create, update or delete that is waiting to be finalized
#[derive(Debug)]
#[must_use = "a staged transaction must be committed or rolled back"]
pub struct StagedTransaction {
    request_id: String,
    kind: TransactionKind,
    items: Vec<ContentItem>,
    properties: BTreeMap<String, String>,
    staged_at: DateTime<Utc>,
}

impl StagedTransaction {
    pub(crate) fn new(
        request_id: String,
        kind: TransactionKind,
        items: Vec<ContentItem>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            request_id,
            kind,
            items,
            properties,
            staged_at: Utc::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Items as they will exist once committed
    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn staged_at(&self) -> DateTime<Utc> {
        self.staged_at
    }

    pub(crate) fn into_items(self) -> Vec<ContentItem> {
        self.items
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Items are still being written
    Staging,
    Staged,
    /// Commit or rollback in progress
    Finalizing,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct Record {
    kind: TransactionKind,
    phase: Phase,
    changes: Vec<StagedChange>,
}

/// Terminal transactions remembered by default
pub const DEFAULT_RETAINED_TRANSACTIONS: usize = 1024;

#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<String, Record>,
    /// Terminal request ids, oldest first
    retired: VecDeque<String>,
}

/// Live request ids and the most recent terminal ones, with their phase.
///
/// Terminal records beyond the retention limit are evicted oldest first.
/// An evicted id reads as unknown: `state` returns `None`, finalizing it is
/// `TransactionAlreadyFinalized` and it may be reserved again.
#[derive(Debug)]
pub(crate) struct TransactionRegistry {
    records: Mutex<Records>,
    retention: usize,
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TRANSACTIONS)
    }
}

impl TransactionRegistry {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_retention(retention: usize) -> Self {
        Self {
            records: Mutex::new(Records::default()),
            retention,
        }
    }

    fn records(&self) -> StorageResult<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| StorageError::Internal("transaction registry lock poisoned".into()))
    }

    fn records_unchecked(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a request id for a new transaction
    pub(crate) fn reserve(&self, request_id: &str, kind: TransactionKind) -> StorageResult<()> {
        let mut records = self.records()?;
        if records.by_id.contains_key(request_id) {
            return Err(StorageError::InvalidRequest(format!(
                "request id '{}' is already in use",
                request_id
            )));
        }
        records.by_id.insert(
            request_id.to_string(),
            Record {
                kind,
                phase: Phase::Staging,
                changes: Vec::new(),
            },
        );
        Ok(())
    }

    /// Forget a request whose staging failed
    pub(crate) fn abandon(&self, request_id: &str) {
        let mut records = self.records_unchecked();
        if matches!(records.by_id.get(request_id), Some(r) if r.phase == Phase::Staging) {
            records.by_id.remove(request_id);
        }
    }

    /// Staging finished; the transaction may now be finalized
    pub(crate) fn mark_staged(&self, request_id: &str, changes: Vec<StagedChange>) -> StorageResult<()> {
        let mut records = self.records()?;
        let record = records.by_id.get_mut(request_id).ok_or_else(|| {
            StorageError::Internal(format!("request '{}' was not reserved", request_id))
        })?;
        record.phase = Phase::Staged;
        record.changes = changes;
        Ok(())
    }

    /// Move a STAGED transaction into finalization, handing out its changes
    pub(crate) fn begin_finalize(
        &self,
        request_id: &str,
    ) -> StorageResult<(TransactionKind, Vec<StagedChange>)> {
        let mut records = self.records()?;
        match records.by_id.get_mut(request_id) {
            Some(record) if record.phase == Phase::Staged => {
                record.phase = Phase::Finalizing;
                Ok((record.kind, std::mem::take(&mut record.changes)))
            }
            _ => Err(StorageError::TransactionAlreadyFinalized(request_id.to_string())),
        }
    }

    /// Record the terminal outcome, evicting the oldest terminal records
    /// past the retention limit
    pub(crate) fn finish(&self, request_id: &str, outcome: TransactionState) {
        let phase = match outcome {
            TransactionState::Committed => Phase::Committed,
            TransactionState::RolledBack => Phase::RolledBack,
            TransactionState::Staging | TransactionState::Staged => return,
        };
        let mut records = self.records_unchecked();
        let Some(record) = records.by_id.get_mut(request_id) else {
            return;
        };
        let already_terminal = matches!(record.phase, Phase::Committed | Phase::RolledBack);
        record.phase = phase;
        record.changes.clear();
        if already_terminal {
            return;
        }

        records.retired.push_back(request_id.to_string());
        while records.retired.len() > self.retention {
            if let Some(oldest) = records.retired.pop_front() {
                records.by_id.remove(&oldest);
            }
        }
    }

    /// Externally visible state. A transaction being finalized still reads as STAGED.
    pub(crate) fn state(&self, request_id: &str) -> Option<TransactionState> {
        let records = self.records_unchecked();
        records.by_id.get(request_id).map(|record| match record.phase {
            Phase::Staging => TransactionState::Staging,
            Phase::Staged | Phase::Finalizing => TransactionState::Staged,
            Phase::Committed => TransactionState::Committed,
            Phase::RolledBack => TransactionState::RolledBack,
        })
    }

    /// Request ids waiting for commit or rollback, sorted
    pub(crate) fn pending(&self) -> Vec<String> {
        let records = self.records_unchecked();
        let mut ids: Vec<String> = records
            .by_id
            .iter()
            .filter(|(_, r)| r.phase == Phase::Staged)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of request ids currently remembered
    #[cfg(test)]
    fn len(&self) -> usize {
        self.records_unchecked().by_id.len()
    }
}
