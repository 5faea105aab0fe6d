//! content-store - A staged, two-phase content store on the local filesystem
//!
//! Content items are written into a per-request staging area first and only
//! become visible once their transaction is committed.

pub mod address;
pub mod content;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod staging;

pub use content::{ContentItem, ContentUri, MimeResolver, MimeType};
pub use engine::{
    ContentStorage, CreateRequest, DeleteRequest, DeleteTarget, StagedTransaction,
    StorageConfig, TransactionKind, TransactionState, UpdateRequest,
};
pub use errors::{StorageError, StorageResult};
