//! # Storage Engine
//!
//! The public face of the content store: configuration, requests, staged
//! transactions and the [`ContentStorage`] engine that ties the address
//! resolver, MIME resolver and staging area together.

pub mod config;
pub mod recovery;
pub mod request;
pub mod storage;
pub mod transaction;

mod locks;

pub use config::{StorageConfig, STORE_DIR, STORE_ROOT_DIR};
pub use recovery::{purge_stale_staging, PurgeStats};
pub use request::{CreateRequest, DeleteRequest, DeleteTarget, UpdateRequest};
pub use storage::{ContentStorage, DEFAULT_FILENAME};
pub use transaction::{
    StagedTransaction, TransactionKind, TransactionState, DEFAULT_RETAINED_TRANSACTIONS,
};
