//! Batched storage requests

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::content::{ContentItem, Metacard};

/// Create a batch of content items.
///
/// Items without an id get a generated one.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub request_id: Option<String>,
    pub items: Vec<ContentItem>,
    pub properties: BTreeMap<String, String>,
}

impl CreateRequest {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    /// Use a caller-chosen request id instead of a generated one
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Replace existing content. Every item must carry an id.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub request_id: Option<String>,
    pub items: Vec<ContentItem>,
    pub properties: BTreeMap<String, String>,
}

impl UpdateRequest {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// What to remove for one metacard
#[derive(Debug, Clone)]
pub struct DeleteTarget {
    pub metacard: Arc<dyn Metacard>,
    /// `None` removes every rendition, `Some("")` only the primary
    pub qualifier: Option<String>,
}

impl DeleteTarget {
    /// Every rendition stored under the metacard's id
    pub fn all(metacard: Arc<dyn Metacard>) -> Self {
        Self {
            metacard,
            qualifier: None,
        }
    }

    /// A single rendition
    pub fn rendition(metacard: Arc<dyn Metacard>, qualifier: impl Into<String>) -> Self {
        Self {
            metacard,
            qualifier: Some(qualifier.into()),
        }
    }
}

/// Remove content for a batch of metacards
#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub request_id: Option<String>,
    pub targets: Vec<DeleteTarget>,
    pub properties: BTreeMap<String, String>,
}

impl DeleteRequest {
    pub fn new(targets: Vec<DeleteTarget>) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }

    /// Remove every rendition of each metacard
    pub fn for_metacards(metacards: impl IntoIterator<Item = Arc<dyn Metacard>>) -> Self {
        Self::new(metacards.into_iter().map(DeleteTarget::all).collect())
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
