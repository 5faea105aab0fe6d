//! Content URIs: `content:<id>` or `content:<id>#<qualifier>`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::{validate_id, validate_qualifier};
use crate::errors::{StorageError, StorageResult};

/// URI scheme prefix for stored content
pub const CONTENT_SCHEME: &str = "content:";

/// Parsed content URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentUri {
    id: String,
    qualifier: String,
}

impl ContentUri {
    /// Build a URI from its parts, validating both
    pub fn new(id: impl Into<String>, qualifier: impl Into<String>) -> StorageResult<Self> {
        let id = id.into();
        let qualifier = qualifier.into();
        validate_id(&id)?;
        validate_qualifier(&qualifier)?;
        Ok(Self { id, qualifier })
    }

    /// Parse `content:<id>[#<qualifier>]`
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let rest = raw.strip_prefix(CONTENT_SCHEME).ok_or_else(|| {
            StorageError::InvalidIdentifier(format!("'{}' is not a content URI", raw))
        })?;
        let (id, qualifier) = match rest.split_once('#') {
            Some((id, qualifier)) => (id, qualifier),
            None => (rest, ""),
        };
        Self::new(id, qualifier)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// True for the primary rendition
    pub fn is_primary(&self) -> bool {
        self.qualifier.is_empty()
    }
}

impl fmt::Display for ContentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CONTENT_SCHEME, self.id)?;
        if !self.qualifier.is_empty() {
            write!(f, "#{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for ContentUri {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentUri {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentUri> for String {
    fn from(uri: ContentUri) -> Self {
        uri.to_string()
    }
}
