//! MIME type normalization.
//!
//! The store consumes a [`MimeResolver`] to turn caller-supplied MIME strings
//! into a canonical type and a preferred file extension. [`GuessMimeResolver`]
//! is the default implementation, backed by `mime_guess` plus any mappings
//! supplied through configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fallback type for content whose type cannot be determined
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Usual extension for common types. `mime_guess` lists extensions
/// alphabetically, which would name plain text `.asm` and XML `.asa`.
const CONVENTIONAL_EXTENSIONS: &[(&str, &str)] = &[
    ("application/gzip", "gz"),
    ("application/javascript", "js"),
    ("application/json", "json"),
    ("application/msword", "doc"),
    ("application/pdf", "pdf"),
    ("application/vnd.nitf", "nitf"),
    ("application/xml", "xml"),
    ("application/yaml", "yaml"),
    ("application/zip", "zip"),
    ("audio/mpeg", "mp3"),
    ("image/jpeg", "jpg"),
    ("image/nitf", "nitf"),
    ("image/png", "png"),
    ("image/svg+xml", "svg"),
    ("image/tiff", "tif"),
    ("text/csv", "csv"),
    ("text/html", "html"),
    ("text/javascript", "js"),
    ("text/markdown", "md"),
    ("text/plain", "txt"),
    ("text/xml", "xml"),
    ("video/mp4", "mp4"),
    ("video/mpeg", "mpg"),
];

/// Structured syntax suffixes, e.g. `application/rss+xml`
const SUFFIX_EXTENSIONS: &[(&str, &str)] = &[("+xml", "xml"), ("+json", "json"), ("+zip", "zip")];

fn conventional_extension(base: &str) -> Option<&'static str> {
    CONVENTIONAL_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == base)
        .map(|(_, ext)| *ext)
}

fn suffix_extension(base: &str) -> Option<&'static str> {
    SUFFIX_EXTENSIONS
        .iter()
        .find(|(suffix, _)| base.ends_with(suffix))
        .map(|(_, ext)| *ext)
}

/// A parsed MIME type.
///
/// Parameters are held as an unordered token set, so
/// `text/xml; charset=UTF-8; id=xml` equals `text/xml; id=xml; charset=UTF-8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MimeType {
    base: String,
    params: BTreeSet<String>,
}

impl MimeType {
    /// Parse a raw MIME string. Returns `None` when the base type is malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut tokens = raw.split(';');
        let base = tokens.next()?.trim().to_ascii_lowercase();

        let (top, sub) = base.split_once('/')?;
        if top.is_empty()
            || sub.is_empty()
            || sub.contains('/')
            || base.chars().any(|c| c.is_whitespace())
        {
            return None;
        }

        let params = tokens
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.replace(' ', ""))
            .collect();

        Some(Self { base, params })
    }

    /// `application/octet-stream`
    pub fn octet_stream() -> Self {
        Self {
            base: OCTET_STREAM.to_string(),
            params: BTreeSet::new(),
        }
    }

    /// Base type without parameters, lowercased
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Parameter tokens, e.g. `charset=UTF-8`
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(String::as_str)
    }

    /// Subtype part of the base, e.g. `nitf` for `image/nitf`
    pub fn subtype(&self) -> &str {
        self.base.split_once('/').map(|(_, s)| s).unwrap_or("")
    }

    pub fn is_octet_stream(&self) -> bool {
        self.base == OCTET_STREAM
    }

    /// Same base type, parameters ignored
    pub fn same_base(&self, other: &MimeType) -> bool {
        self.base == other.base
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}

/// Outcome of resolving a raw MIME string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMime {
    pub mime_type: MimeType,
    pub preferred_extension: Option<String>,
}

/// MIME resolution collaborator
pub trait MimeResolver: Send + Sync + fmt::Debug {
    /// Normalize a raw MIME string. `None` if it cannot be parsed.
    fn resolve(&self, raw: &str) -> Option<ResolvedMime>;

    /// Known file extensions for a base type, without leading dots
    fn extensions(&self, base: &str) -> Vec<String>;

    /// MIME type for a file extension
    fn type_for_extension(&self, extension: &str) -> Option<MimeType>;

    /// Whether a filename extension agrees with a base type
    fn accepts_extension(&self, base: &str, extension: &str) -> bool {
        self.extensions(base)
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    }
}

/// Default resolver: configured mappings first, then `mime_guess`
#[derive(Debug, Clone, Default)]
pub struct GuessMimeResolver {
    custom: BTreeMap<String, Vec<String>>,
}

impl GuessMimeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from configured `base type -> extensions` mappings
    pub fn with_mappings(mappings: &BTreeMap<String, Vec<String>>) -> Self {
        let mut resolver = Self::new();
        for (base, extensions) in mappings {
            resolver.add_mapping(base, extensions.iter().map(String::as_str));
        }
        resolver
    }

    /// Register extensions for a base type. The first extension is preferred.
    pub fn add_mapping<'a>(&mut self, base: &str, extensions: impl IntoIterator<Item = &'a str>) {
        let entry = self.custom.entry(base.trim().to_ascii_lowercase()).or_default();
        for ext in extensions {
            let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() && !entry.contains(&ext) {
                entry.push(ext);
            }
        }
    }

    /// Conventional extension, then one named after the subtype, then the
    /// structured suffix, then the first extension that maps back to the type
    fn preferred_extension(mime: &MimeType, extensions: &[String]) -> Option<String> {
        if let Some(ext) = conventional_extension(mime.base()) {
            return Some(ext.to_string());
        }
        let subtype = mime.subtype();
        let stem = subtype.split('+').next().unwrap_or(subtype);
        extensions
            .iter()
            .find(|ext| ext.as_str() == subtype || ext.as_str() == stem)
            .cloned()
            .or_else(|| suffix_extension(mime.base()).map(str::to_string))
            .or_else(|| {
                extensions
                    .iter()
                    .find(|ext| {
                        mime_guess::from_ext(ext)
                            .first()
                            .map_or(false, |m| m.essence_str() == mime.base())
                    })
                    .cloned()
            })
            .or_else(|| extensions.first().cloned())
    }
}

impl MimeResolver for GuessMimeResolver {
    fn resolve(&self, raw: &str) -> Option<ResolvedMime> {
        let mime_type = MimeType::parse(raw)?;
        let preferred_extension = if mime_type.is_octet_stream() {
            None
        } else if let Some(custom) = self.custom.get(mime_type.base()) {
            // configured order wins
            custom.first().cloned()
        } else {
            Self::preferred_extension(&mime_type, &self.extensions(mime_type.base()))
        };
        Some(ResolvedMime {
            mime_type,
            preferred_extension,
        })
    }

    fn extensions(&self, base: &str) -> Vec<String> {
        if let Some(custom) = self.custom.get(base) {
            return custom.clone();
        }
        let mut known: Vec<String> = mime_guess::get_mime_extensions_str(base)
            .map(|exts| exts.iter().map(|e| e.to_string()).collect())
            .unwrap_or_default();
        if let Some(usual) = conventional_extension(base).or_else(|| suffix_extension(base)) {
            if !known.iter().any(|e| e == usual) {
                known.insert(0, usual.to_string());
            }
        }
        known
    }

    fn type_for_extension(&self, extension: &str) -> Option<MimeType> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if extension.is_empty() {
            return None;
        }
        if let Some((base, _)) = self
            .custom
            .iter()
            .find(|(_, exts)| exts.iter().any(|e| *e == extension))
        {
            return MimeType::parse(base);
        }
        mime_guess::from_ext(&extension)
            .first()
            .and_then(|m| MimeType::parse(m.essence_str()))
    }

    fn accepts_extension(&self, base: &str, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        if let Some(custom) = self.custom.get(base) {
            return custom.contains(&extension);
        }
        self.extensions(base).contains(&extension)
            || mime_guess::from_ext(&extension)
                .iter()
                .any(|m| m.essence_str() == base)
    }
}
