//! Lifecycle events of the content store
//!
//! Events are explicit and typed.

use std::fmt;

/// Observable events in the content store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Store opened and directories verified
    StoreOpened,
    /// Leftover staging from an earlier process removed
    StagingPurged,

    // Transactions
    /// Create/update/delete staged under a request id
    TransactionStaged,
    /// Staging for a request failed and was discarded
    StagingFailed,
    /// Staged changes promoted into the durable store
    TransactionCommitted,
    /// Commit failed; durable store restored
    CommitAborted,
    /// Staged changes discarded
    TransactionRolledBack,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StoreOpened => "CONTENT_STORE_OPENED",
            Event::StagingPurged => "STAGING_PURGED",
            Event::TransactionStaged => "TRANSACTION_STAGED",
            Event::StagingFailed => "STAGING_FAILED",
            Event::TransactionCommitted => "TRANSACTION_COMMITTED",
            Event::CommitAborted => "COMMIT_ABORTED",
            Event::TransactionRolledBack => "TRANSACTION_ROLLED_BACK",
        }
    }

    /// Events that report a failed operation
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::StagingFailed | Event::CommitAborted)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::StoreOpened,
            Event::StagingPurged,
            Event::TransactionStaged,
            Event::StagingFailed,
            Event::TransactionCommitted,
            Event::CommitAborted,
            Event::TransactionRolledBack,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_events() {
        assert!(Event::CommitAborted.is_failure());
        assert!(Event::StagingFailed.is_failure());
        assert!(!Event::TransactionCommitted.is_failure());
    }
}
