//! Result cache: keyed store of pipeline outputs with best-effort /
//! full duality and de-duplication of concurrent computation.

mod stage;
mod store;

pub use stage::{BEST_EFFORT_PREFIX, CacheStage};
pub use store::{CacheStore, MemoryStore};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use assetmill_core::nut::{Nut, NutType, TransformerSpec};
use assetmill_core::{MillError, Result};

use crate::request::PipelineRequest;
use crate::scan::apply_transformers;

/// Insertion-ordered map of output unit name to cache entry.
pub type EntryMap = IndexMap<String, CacheEntry>;

/// One cached unit.
///
/// Static entries carry the materialized bytes and are safe to store
/// verbatim. Dynamic entries only reference the unit's name plus its
/// recorded transforms: dynamic content must be recomputed against the
/// live request's units at lookup time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEntry {
    Static {
        name: String,
        nut_type: NutType,
        version: u64,
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
        referenced: Vec<CacheEntry>,
        sources: Vec<CacheEntry>,
    },
    Dynamic {
        name: String,
        /// Name the live unit is found under in the current request;
        /// differs from `name` when the served name carries a prefix.
        initial_name: String,
        referenced_names: Vec<String>,
        transformers: Vec<TransformerSpec>,
    },
}

impl CacheEntry {
    /// Serializes a processed unit. The nut should already be frozen
    /// with [`Nut::to_static`]; dynamic units degrade to name entries.
    pub fn from_nut(nut: &Nut) -> Result<CacheEntry> {
        if nut.is_dynamic() {
            return Ok(CacheEntry::Dynamic {
                name: nut.name().to_string(),
                initial_name: nut.initial_name().to_string(),
                referenced_names: nut.referenced().iter().map(|n| n.name().to_string()).collect(),
                transformers: nut.transformers().to_vec(),
            });
        }

        Ok(CacheEntry::Static {
            name: nut.name().to_string(),
            nut_type: nut.nut_type(),
            version: nut.version()?,
            bytes: nut.bytes()?,
            referenced: nut.referenced().iter().map(CacheEntry::from_nut).collect::<Result<_>>()?,
            sources: nut.sources().iter().map(CacheEntry::from_nut).collect::<Result<_>>()?,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            CacheEntry::Static { name, .. } | CacheEntry::Dynamic { name, .. } => name,
        }
    }

    /// Content bytes accounted for by the size-bounded store. Only
    /// static payloads count; object overhead is deliberately ignored.
    pub fn content_size(&self) -> u64 {
        match self {
            CacheEntry::Static {
                bytes,
                referenced,
                sources,
                ..
            } => {
                bytes.len() as u64
                    + referenced.iter().map(CacheEntry::content_size).sum::<u64>()
                    + sources.iter().map(CacheEntry::content_size).sum::<u64>()
            }
            CacheEntry::Dynamic { .. } => 0,
        }
    }

    /// Depth-first search over the entry tree: the entry's own name,
    /// then its referenced units, then its declared source units.
    pub fn find(&self, path: &str) -> Option<&CacheEntry> {
        if self.name() == path {
            return Some(self);
        }

        if let CacheEntry::Static {
            referenced, sources, ..
        } = self
        {
            for entry in referenced.iter().chain(sources) {
                if let Some(found) = entry.find(path) {
                    return Some(found);
                }
            }
        }

        None
    }

    /// Converts the entry back to a live unit.
    ///
    /// A dynamic entry whose unit is absent from the current request's
    /// units is a fatal inconsistency: the cache holds a result for a
    /// different workflow or stale content.
    pub fn to_nut(&self, request: &PipelineRequest) -> Result<Nut> {
        match self {
            CacheEntry::Static {
                name,
                nut_type,
                version,
                bytes,
                referenced,
                sources,
            } => {
                let mut nut = Nut::from_typed_bytes(name.clone(), *nut_type, bytes.clone());
                nut.set_version(*version);
                for entry in referenced {
                    nut.add_reference(entry.to_nut(request)?);
                }
                for entry in sources {
                    nut.add_source(entry.to_nut(request)?);
                }
                Ok(nut)
            }
            CacheEntry::Dynamic {
                name,
                initial_name,
                referenced_names,
                transformers,
            } => {
                let live = request
                    .nuts()
                    .iter()
                    .find_map(|n| n.find_by_name(initial_name))
                    .ok_or_else(|| {
                        MillError::Inconsistency(format!(
                            "dynamic cache entry '{name}' has no unit in request '{}'",
                            request.key()
                        ))
                    })?;

                let mut nut = live.clone();
                nut.rename(name.clone());
                let recomputed = apply_transformers(transformers, &live.text()?);
                nut.set_bytes(recomputed.into_bytes());
                for spec in transformers {
                    if !nut.transformers().contains(spec) {
                        nut.add_transformer(spec.clone());
                    }
                }

                for reference in referenced_names {
                    if nut.find_by_name(reference).is_none() {
                        if let Some(found) =
                            request.nuts().iter().find_map(|n| n.find_by_name(reference))
                        {
                            nut.add_reference(found.clone());
                        }
                    }
                }

                Ok(nut)
            }
        }
    }
}

/// The cached value for one request key: one map per processing flavor.
/// A best-effort result is created first and the full result patched in
/// when the deferred computation completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheResult {
    pub best_effort: Option<EntryMap>,
    pub default: Option<EntryMap>,
}

impl CacheResult {
    pub fn best_effort_only(map: EntryMap) -> CacheResult {
        CacheResult {
            best_effort: Some(map),
            default: None,
        }
    }

    pub fn default_only(map: EntryMap) -> CacheResult {
        CacheResult {
            best_effort: None,
            default: Some(map),
        }
    }

    /// Content bytes held by this result, the store's accounting unit.
    pub fn content_size(&self) -> u64 {
        self.best_effort
            .iter()
            .chain(self.default.iter())
            .flat_map(|map| map.values())
            .map(CacheEntry::content_size)
            .sum()
    }
}

/// Serializes processed units into an entry map keyed by name.
pub fn entry_map(nuts: &[Nut]) -> Result<EntryMap> {
    let mut map = EntryMap::with_capacity(nuts.len());

    for nut in nuts {
        let entry = CacheEntry::from_nut(nut)?;
        map.insert(entry.name().to_string(), entry);
    }

    Ok(map)
}

/// Converts a whole entry map back to live units, preserving order.
pub fn entries_to_nuts(map: &EntryMap, request: &PipelineRequest) -> Result<Vec<Nut>> {
    map.values().map(|entry| entry.to_nut(request)).collect()
}
