//! Operational counters for the content store
//!
//! - Counters only, monotonic
//! - Reset only when the store is opened
//! - Thread-safe, lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one open store
#[derive(Debug, Default)]
pub struct StorageMetrics {
    items_staged: AtomicU64,
    bytes_staged: AtomicU64,
    deletions_staged: AtomicU64,
    staging_failures: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    rollbacks: AtomicU64,
    reads: AtomicU64,
    reads_not_found: AtomicU64,
}

impl StorageMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one staged create/update item
    pub fn record_staged(&self, bytes: u64) {
        self.items_staged.fetch_add(1, Ordering::Relaxed);
        self.bytes_staged.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_deletions_staged(&self) {
        self.deletions_staged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_staging_failures(&self) {
        self.staging_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commit_failures(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read; `found` is false when it failed with not-found
    pub fn record_read(&self, found: bool) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.reads_not_found.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_staged: self.items_staged.load(Ordering::Relaxed),
            bytes_staged: self.bytes_staged.load(Ordering::Relaxed),
            deletions_staged: self.deletions_staged.load(Ordering::Relaxed),
            staging_failures: self.staging_failures.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            reads_not_found: self.reads_not_found.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub items_staged: u64,
    pub bytes_staged: u64,
    pub deletions_staged: u64,
    pub staging_failures: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub rollbacks: u64,
    pub reads: u64,
    pub reads_not_found: u64,
}
