//! # Content Items

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::uri::ContentUri;

/// Produces a fresh readable stream over some bytes.
///
/// The store opens a source once per staging operation and reads it to the
/// end; the source itself stays owned by the caller.
pub trait ByteSource: Send + Sync + fmt::Debug {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Size in bytes, if known without reading
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Local file backing this source, if any
    fn local_path(&self) -> Option<&Path> {
        None
    }
}

/// Bytes held in memory
#[derive(Clone, PartialEq, Eq)]
pub struct MemorySource(Arc<[u8]>);

impl MemorySource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self(Arc::from(bytes))
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource").field("len", &self.0.len()).finish()
    }
}

impl ByteSource for MemorySource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.0.clone())))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }
}

/// A file on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn size_hint(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Source with no bytes, used for deletion results
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySource;

impl ByteSource for EmptySource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::empty()))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(0)
    }
}

/// Opaque catalog metadata record.
///
/// The store only ever asks a metacard for its identifier.
pub trait Metacard: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
}

/// Minimal metacard carrying an id and free-form attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicMetacard {
    pub id: String,
    #[serde(default)]
    pub attributes: Value,
}

impl BasicMetacard {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Value::Object(Default::default()),
        }
    }
}

impl Metacard for BasicMetacard {
    fn id(&self) -> &str {
        &self.id
    }
}

/// One stored binary payload plus its descriptive attributes
#[derive(Debug, Clone)]
pub struct ContentItem {
    /// Content identifier. Empty on input means "assign one".
    pub id: String,
    /// Rendition qualifier, empty for the primary rendition
    pub qualifier: String,
    /// Raw or normalized MIME type string
    pub mime_type: String,
    pub filename: String,
    pub size: u64,
    /// SHA-256 of the bytes, hex. Filled in by the store.
    pub checksum: Option<String>,
    /// Caller-defined properties carried through unchanged
    pub properties: BTreeMap<String, String>,
    /// Stored by reference: the source file is linked, not copied
    pub by_reference: bool,
    pub source: Arc<dyn ByteSource>,
    pub metacard: Option<Arc<dyn Metacard>>,
}

impl ContentItem {
    /// New item over in-memory bytes. The id is assigned by the store.
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: &str, filename: &str) -> Self {
        let source = MemorySource::new(bytes);
        let size = source.size_hint().unwrap_or(0);
        Self {
            id: String::new(),
            qualifier: String::new(),
            mime_type: mime_type.to_string(),
            filename: filename.to_string(),
            size,
            checksum: None,
            properties: BTreeMap::new(),
            by_reference: false,
            source: Arc::new(source),
            metacard: None,
        }
    }

    /// New item whose bytes come from an arbitrary source
    pub fn from_source(source: Arc<dyn ByteSource>, mime_type: &str, filename: &str) -> Self {
        Self {
            size: source.size_hint().unwrap_or(0),
            source,
            ..Self::new(Vec::new(), mime_type, filename)
        }
    }

    /// New item that stores a reference to an existing local file
    pub fn reference(path: impl Into<PathBuf>, mime_type: &str, filename: &str) -> Self {
        let mut item = Self::from_source(Arc::new(FileSource::new(path)), mime_type, filename);
        item.by_reference = true;
        item
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn with_metacard(mut self, metacard: Arc<dyn Metacard>) -> Self {
        self.metacard = Some(metacard);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// `content:<id>[#<qualifier>]`
    pub fn uri(&self) -> String {
        let mut uri = format!("{}{}", super::uri::CONTENT_SCHEME, self.id);
        if !self.qualifier.is_empty() {
            uri.push('#');
            uri.push_str(&self.qualifier);
        }
        uri
    }

    /// Parsed URI, if id and qualifier are valid
    pub fn content_uri(&self) -> Option<ContentUri> {
        ContentUri::new(self.id.clone(), self.qualifier.clone()).ok()
    }

    /// Read every byte from the item's source
    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size as usize);
        self.source.open()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Generate a fresh 32-character identifier
    pub fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()
    }
}
