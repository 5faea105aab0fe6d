//! # Content Model
//!
//! Content items, their URIs, and MIME normalization.

pub mod item;
pub mod mime;
pub mod uri;

pub use item::{
    BasicMetacard, ByteSource, ContentItem, EmptySource, FileSource, MemorySource, Metacard,
};
pub use mime::{GuessMimeResolver, MimeResolver, MimeType, ResolvedMime, OCTET_STREAM};
pub use uri::{ContentUri, CONTENT_SCHEME};
