//! # Content Storage Errors
//!
//! Every operation on the store returns a [`StorageResult`]. Errors are
//! surfaced synchronously; this layer never retries.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type for content storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Content storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    // Lookup errors
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Content already exists: {0}")]
    AlreadyExists(String),

    #[error("Content not stored: {0}")]
    NotStored(String),

    // Transaction errors
    #[error("Transaction already finalized or unknown: {0}")]
    TransactionAlreadyFinalized(String),

    #[error("Commit of {request_id} aborted, failed items: {}", failed.join(", "))]
    CommitFailed {
        request_id: String,
        failed: Vec<String>,
        #[source]
        source: Box<StorageError>,
    },

    // I/O errors
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Wrap an I/O error with the path it concerns
    pub fn io(action: &str, path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            context: format!("{} {}", action, path.display()),
            source,
        }
    }

    /// Map an I/O error, turning `NotFound` into a content lookup failure
    pub fn io_or_not_found(action: &str, path: &Path, what: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(what.to_string())
        } else {
            Self::io(action, path, source)
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::InvalidRequest(_) => "CONTENT_INVALID_REQUEST",
            StorageError::InvalidIdentifier(_) => "CONTENT_INVALID_IDENTIFIER",
            StorageError::NotFound(_) => "CONTENT_NOT_FOUND",
            StorageError::AlreadyExists(_) => "CONTENT_ALREADY_EXISTS",
            StorageError::NotStored(_) => "CONTENT_NOT_STORED",
            StorageError::TransactionAlreadyFinalized(_) => "CONTENT_TRANSACTION_FINALIZED",
            StorageError::CommitFailed { .. } => "CONTENT_COMMIT_FAILED",
            StorageError::Io { .. } => "CONTENT_IO_FAILURE",
            StorageError::Config(_) => "CONTENT_CONFIG_ERROR",
            StorageError::Internal(_) => "CONTENT_INTERNAL_ERROR",
        }
    }

    /// Whether the error was caused by the caller's input rather than the store
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidRequest(_)
                | StorageError::InvalidIdentifier(_)
                | StorageError::NotFound(_)
                | StorageError::AlreadyExists(_)
                | StorageError::NotStored(_)
                | StorageError::TransactionAlreadyFinalized(_)
        )
    }
}
