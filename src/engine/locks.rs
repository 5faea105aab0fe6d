//! Mutual exclusion for commits touching the same content id.
//!
//! A commit claims every id it touches in one step, waiting until none of
//! them is held by another commit. Claiming the whole set atomically means
//! two commits can never each hold part of the other's set.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex, PoisonError};

use crate::errors::{StorageError, StorageResult};

/// Set of currently held content ids
#[derive(Debug, Default)]
pub(crate) struct ContentLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl ContentLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until every id in `ids` is free, then hold them all
    pub(crate) fn acquire<'a, I>(&self, ids: I) -> StorageResult<LockGuard<'_>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: BTreeSet<String> = ids.into_iter().map(str::to_string).collect();

        let poisoned = |_| StorageError::Internal("content lock poisoned".into());
        let mut held = self.held.lock().map_err(poisoned)?;
        while wanted.iter().any(|id| held.contains(id)) {
            held = self.released.wait(held).map_err(poisoned)?;
        }
        held.extend(wanted.iter().cloned());

        Ok(LockGuard {
            locks: self,
            ids: wanted,
        })
    }

    #[cfg(test)]
    fn is_held(&self, id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}

/// Releases its ids on drop
#[derive(Debug)]
pub(crate) struct LockGuard<'a> {
    locks: &'a ContentLocks,
    ids: BTreeSet<String>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            held.remove(id);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
