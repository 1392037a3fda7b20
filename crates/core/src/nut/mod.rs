//! Content units ("nuts") flowing through the processing pipeline.
//!
//! A nut has an immutable identity (initial name, type) and a content
//! side that stages rewrite as the unit moves down a chain. Referenced
//! units discovered during inspection and provenance units produced by
//! aggregation hang off the owning nut.

mod composite;
mod transform;

pub use composite::{composite, merge_nuts};
pub use transform::TransformerSpec;

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{MillError, Result};
use crate::util::merge_path;

/// Extension-derived content category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NutType {
    Script,
    Stylesheet,
    Image,
    Markup,
    SourceMap,
}

impl NutType {
    /// Maps a path-like name to its category from the file extension.
    pub fn from_path(name: &str) -> Option<NutType> {
        let ext = name.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "js" | "mjs" => Some(NutType::Script),
            "css" => Some(NutType::Stylesheet),
            "png" | "jpg" | "jpeg" | "gif" | "svg" => Some(NutType::Image),
            "html" | "htm" => Some(NutType::Markup),
            "map" => Some(NutType::SourceMap),
            _ => None,
        }
    }

    /// Canonical extension, used when stages synthesize output names.
    pub fn extension(self) -> &'static str {
        match self {
            NutType::Script => ".js",
            NutType::Stylesheet => ".css",
            NutType::Image => ".png",
            NutType::Markup => ".html",
            NutType::SourceMap => ".map",
        }
    }

    pub fn is_text(self) -> bool {
        !matches!(self, NutType::Image)
    }
}

/// Provider-backed content, re-read on every access. Implementations
/// back dynamic units whose bytes may change between two reads.
pub trait ContentSource: Send + Sync {
    fn read(&self) -> Result<Vec<u8>>;
}

/// Where a nut's bytes come from.
#[derive(Clone)]
pub enum Content {
    Bytes(Arc<[u8]>),
    Source(Arc<dyn ContentSource>),
    /// The unit exists by name but its content could not be read.
    /// Poisons the same-name merge step of chain execution.
    Unreachable,
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Content::Source(_) => write!(f, "Source(..)"),
            Content::Unreachable => write!(f, "Unreachable"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Version {
    pinned: Option<u64>,
    computed: Arc<OnceCell<u64>>,
}

/// A named, typed, versioned piece of content.
#[derive(Debug, Clone)]
pub struct Nut {
    name: String,
    initial_name: String,
    nut_type: NutType,
    dynamic: bool,
    content: Content,
    version: Version,
    transformers: Vec<TransformerSpec>,
    referenced: Vec<Nut>,
    sources: Vec<Nut>,
}

impl Nut {
    /// Builds a byte-backed nut, deriving the type from the name.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Result<Nut> {
        let name = name.into();
        let nut_type =
            NutType::from_path(&name).ok_or_else(|| MillError::UnsupportedType(name.clone()))?;
        Ok(Nut::new(name, nut_type, Content::Bytes(bytes.into().into())))
    }

    /// Builds a provider-backed nut whose content is re-read on access.
    pub fn from_source(
        name: impl Into<String>,
        source: Arc<dyn ContentSource>,
        dynamic: bool,
    ) -> Result<Nut> {
        let name = name.into();
        let nut_type =
            NutType::from_path(&name).ok_or_else(|| MillError::UnsupportedType(name.clone()))?;
        let mut nut = Nut::new(name, nut_type, Content::Source(source));
        nut.dynamic = dynamic;
        Ok(nut)
    }

    /// Builds a byte-backed nut with an explicit type, for callers that
    /// already know the category (deserialized cache entries).
    pub fn from_typed_bytes(
        name: impl Into<String>,
        nut_type: NutType,
        bytes: impl Into<Vec<u8>>,
    ) -> Nut {
        Nut::new(name.into(), nut_type, Content::Bytes(bytes.into().into()))
    }

    /// Builds a placeholder for a unit whose content could not be read.
    pub fn unreachable(name: impl Into<String>, nut_type: NutType) -> Nut {
        Nut::new(name.into(), nut_type, Content::Unreachable)
    }

    fn new(name: String, nut_type: NutType, content: Content) -> Nut {
        Nut {
            initial_name: name.clone(),
            name,
            nut_type,
            dynamic: false,
            content,
            version: Version::default(),
            transformers: Vec::new(),
            referenced: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_name(&self) -> &str {
        &self.initial_name
    }

    pub fn nut_type(&self) -> NutType {
        self.nut_type
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_reachable(&self) -> bool {
        !matches!(self.content, Content::Unreachable)
    }

    pub fn transformers(&self) -> &[TransformerSpec] {
        &self.transformers
    }

    pub fn referenced(&self) -> &[Nut] {
        &self.referenced
    }

    pub fn referenced_mut(&mut self) -> &mut Vec<Nut> {
        &mut self.referenced
    }

    pub fn sources(&self) -> &[Nut] {
        &self.sources
    }

    /// Raw content bytes, without transformer re-application.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match &self.content {
            Content::Bytes(b) => Ok(b.to_vec()),
            Content::Source(s) => s.read(),
            Content::Unreachable => Err(MillError::Inconsistency(format!(
                "content of '{}' is not reachable",
                self.name
            ))),
        }
    }

    /// Content as text, for inspection and text transforms.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.bytes()?).map_err(|_| MillError::NotText(self.name.clone()))
    }

    /// Version number, lazily derived from the content hash unless the
    /// creator pinned one. Memoized for the lifetime of the nut.
    pub fn version(&self) -> Result<u64> {
        if let Some(pinned) = self.version.pinned {
            return Ok(pinned);
        }
        if let Some(computed) = self.version.computed.get() {
            return Ok(*computed);
        }
        let bytes = self.bytes()?;
        Ok(*self.version.computed.get_or_init(|| xxh3_64(&bytes)))
    }

    /// Pins the version number instead of deriving it from content.
    pub fn set_version(&mut self, version: u64) {
        self.version.pinned = Some(version);
    }

    /// Renames the served name; the initial name stays untouched.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Prefixes the served name, e.g. for best-effort results that must
    /// not collide with fully processed ones.
    pub fn with_prefix(mut self, prefix: &str) -> Nut {
        self.name = merge_path(&[prefix, &self.name]);
        self
    }

    /// Replaces the content with in-memory bytes. The memoized version
    /// is kept: a rewrite does not change the logical revision.
    pub fn set_bytes(&mut self, bytes: impl Into<Vec<u8>>) {
        self.content = Content::Bytes(bytes.into().into());
    }

    pub fn add_transformer(&mut self, spec: TransformerSpec) {
        self.transformers.push(spec);
    }

    pub fn add_reference(&mut self, nut: Nut) {
        self.referenced.push(nut);
    }

    pub fn add_source(&mut self, nut: Nut) {
        self.sources.push(nut);
    }

    /// Depth-first lookup over this nut, its referenced units and its
    /// source units.
    pub fn find_by_name(&self, name: &str) -> Option<&Nut> {
        if self.name == name {
            return Some(self);
        }
        for nut in &self.referenced {
            if let Some(found) = nut.find_by_name(name) {
                return Some(found);
            }
        }
        for nut in &self.sources {
            if let Some(found) = nut.find_by_name(name) {
                return Some(found);
            }
        }
        None
    }

    /// Freezes this nut (and its sub-units) into byte-backed form so it
    /// can be stored verbatim. Dynamic units keep their provider: their
    /// bytes must be recomputed at lookup time.
    pub fn to_static(&self) -> Result<Nut> {
        let mut frozen = self.clone();
        if !self.dynamic && self.is_reachable() {
            let bytes = self.bytes()?;
            // Force the memoized version before the provider is dropped.
            let version = self.version()?;
            frozen.set_bytes(bytes);
            frozen.set_version(version);
        }
        frozen.referenced = self
            .referenced
            .iter()
            .map(Nut::to_static)
            .collect::<Result<Vec<_>>>()?;
        frozen.sources = self
            .sources
            .iter()
            .map(Nut::to_static)
            .collect::<Result<Vec<_>>>()?;
        Ok(frozen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_from_path() {
        assert_eq!(NutType::from_path("a/b/app.js"), Some(NutType::Script));
        assert_eq!(NutType::from_path("style.CSS"), Some(NutType::Stylesheet));
        assert_eq!(NutType::from_path("logo.png"), Some(NutType::Image));
        assert_eq!(NutType::from_path("index.html"), Some(NutType::Markup));
        assert_eq!(NutType::from_path("app.js.map"), Some(NutType::SourceMap));
        assert_eq!(NutType::from_path("README"), None);
    }

    #[test]
    fn version_is_memoized_content_hash() {
        let nut = Nut::from_bytes("a.js", b"var x = 1;".to_vec()).unwrap();
        let first = nut.version().unwrap();
        assert_eq!(first, nut.version().unwrap());
        assert_eq!(first, xxh3_64(b"var x = 1;"));
    }

    #[test]
    fn pinned_version_wins() {
        let mut nut = Nut::from_bytes("a.js", b"x".to_vec()).unwrap();
        nut.set_version(42);
        assert_eq!(nut.version().unwrap(), 42);
    }

    #[test]
    fn find_by_name_walks_references_then_sources() {
        let mut root = Nut::from_bytes("root.css", b"".to_vec()).unwrap();
        let mut referenced = Nut::from_bytes("ref.css", b"".to_vec()).unwrap();
        referenced.add_reference(Nut::from_bytes("nested.png", b"".to_vec()).unwrap());
        root.add_reference(referenced);
        root.add_source(Nut::from_bytes("origin.css", b"".to_vec()).unwrap());

        assert!(root.find_by_name("root.css").is_some());
        assert!(root.find_by_name("nested.png").is_some());
        assert!(root.find_by_name("origin.css").is_some());
        assert!(root.find_by_name("absent.css").is_none());
    }

    #[test]
    fn prefix_renames_served_name_only() {
        let nut = Nut::from_bytes("app.js", b"x".to_vec()).unwrap();
        let prefixed = nut.with_prefix("best-effort");
        assert_eq!(prefixed.name(), "best-effort/app.js");
        assert_eq!(prefixed.initial_name(), "app.js");
    }

    #[test]
    fn unreachable_nut_refuses_reads() {
        let nut = Nut::unreachable("gone.js", NutType::Script);
        assert!(!nut.is_reachable());
        assert!(nut.bytes().is_err());
    }
}
