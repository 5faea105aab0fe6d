//! Content store configuration
//!
//! Loaded from a JSON file or built in code, then validated once when the
//! store is opened. An unusable base directory fails fast.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::staging::STAGING_DIR;

use super::transaction::DEFAULT_RETAINED_TRANSACTIONS;

/// Directory under the base directory holding the durable store
pub const STORE_ROOT_DIR: &str = "content-store-root";

/// Directory under [`STORE_ROOT_DIR`] holding sharded content
pub const STORE_DIR: &str = "content-store";

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base content directory (required, must exist and be writable)
    pub base_dir: PathBuf,

    /// fsync staged files before they are renamed into place (default true)
    #[serde(default = "default_fsync")]
    pub fsync: bool,

    /// Reject creates of already-stored ids and updates of unstored ids (default false)
    #[serde(default)]
    pub enforce_existence: bool,

    /// Remove leftover staging directories when the store is opened (default true)
    #[serde(default = "default_purge_stale_staging")]
    pub purge_stale_staging: bool,

    /// Extra MIME base type to extension mappings, preferred extension first
    #[serde(default)]
    pub mime_mappings: BTreeMap<String, Vec<String>>,

    /// Finished transactions whose outcome stays queryable (default 1024)
    #[serde(default = "default_retained_transactions")]
    pub retained_transactions: usize,
}

fn default_fsync() -> bool {
    true
}
fn default_purge_stale_staging() -> bool {
    true
}
fn default_retained_transactions() -> usize {
    DEFAULT_RETAINED_TRANSACTIONS
}

impl StorageConfig {
    /// Configuration with defaults for everything but the base directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            fsync: default_fsync(),
            enforce_existence: false,
            purge_stale_staging: default_purge_stale_staging(),
            mime_mappings: BTreeMap::new(),
            retained_transactions: default_retained_transactions(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> StorageResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: StorageConfig = serde_json::from_str(&content)
            .map_err(|e| StorageError::Config(format!("invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_enforce_existence(mut self, enforce: bool) -> Self {
        self.enforce_existence = enforce;
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn with_purge_stale_staging(mut self, purge: bool) -> Self {
        self.purge_stale_staging = purge;
        self
    }

    pub fn with_retained_transactions(mut self, retained: usize) -> Self {
        self.retained_transactions = retained;
        self
    }

    /// Register extensions for a MIME base type
    pub fn with_mime_mapping(mut self, base: &str, extensions: &[&str]) -> Self {
        self.mime_mappings.insert(
            base.to_string(),
            extensions.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    /// Check the base directory exists, is a directory, and is writable
    pub fn validate(&self) -> StorageResult<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(StorageError::Config("base_dir must be set".into()));
        }

        let meta = fs::metadata(&self.base_dir).map_err(|e| {
            StorageError::Config(format!(
                "base_dir {} is not accessible: {}",
                self.base_dir.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(StorageError::Config(format!(
                "base_dir {} is not a directory",
                self.base_dir.display()
            )));
        }

        let check_file = self
            .base_dir
            .join(format!(".write-check-{}", Uuid::new_v4().simple()));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&check_file)
            .map_err(|e| {
                StorageError::Config(format!(
                    "base_dir {} is not writable: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        let _ = fs::remove_file(&check_file);

        if self.retained_transactions == 0 {
            return Err(StorageError::Config(
                "retained_transactions must be at least 1".into(),
            ));
        }

        for (base, extensions) in &self.mime_mappings {
            if !base.contains('/') || extensions.is_empty() {
                return Err(StorageError::Config(format!(
                    "invalid mime mapping '{}' -> {:?}",
                    base, extensions
                )));
            }
        }
        Ok(())
    }

    /// `<base>/tmp`
    pub fn staging_root(&self) -> PathBuf {
        self.base_dir.join(STAGING_DIR)
    }

    /// `<base>/content-store-root/content-store`
    pub fn store_root(&self) -> PathBuf {
        self.base_dir.join(STORE_ROOT_DIR).join(STORE_DIR)
    }
}
