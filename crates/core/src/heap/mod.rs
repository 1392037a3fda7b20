//! Heap provider contract.
//!
//! A heap resolves relative reference strings to content units and
//! notifies registered listeners when underlying content changes. The
//! engine never resolves resources itself; concrete backends live
//! behind this trait.

mod memory;

pub use memory::MemoryHeap;

use std::sync::Arc;

use crate::error::Result;
use crate::nut::Nut;
use crate::util::{merge_path, simplify_path};

/// Signals emitted by a heap to interested parties, typically caches
/// that must evict results computed from stale content.
pub trait HeapListener: Send + Sync {
    /// Stable identity used to keep registration idempotent: two
    /// listeners with the same key count as one registration.
    fn key(&self) -> u64;

    /// Content behind the heap changed.
    fn nut_updated(&self, heap_id: &str);
}

/// A resolvable collection of content units.
pub trait Heap: Send + Sync {
    fn heap_id(&self) -> &str;

    /// Resolves a relative reference found inside `referencer` to zero
    /// or more units. An empty result means "not found" and is the
    /// recoverable resolution-failure case; `Err` is reserved for I/O.
    fn resolve(&self, referencer: &Nut, path: &str) -> Result<Vec<Nut>>;

    /// Registers an update listener. Registration is idempotent per
    /// listener key.
    fn add_listener(&self, listener: Arc<dyn HeapListener>);
}

/// Scopes reference resolution to a directory of the base heap, with a
/// fallback heap tried when the scoped resolution yields nothing.
///
/// This is a pure operation over the provider contract: the returned
/// heap shares the base heap's identity and listener registry.
pub fn derive_heap(
    base: Arc<dyn Heap>,
    root_path: &str,
    fallback: Arc<dyn Heap>,
) -> Arc<dyn Heap> {
    Arc::new(ScopedHeap {
        base,
        root: root_path.trim_matches('/').to_string(),
        fallback,
    })
}

struct ScopedHeap {
    base: Arc<dyn Heap>,
    root: String,
    fallback: Arc<dyn Heap>,
}

impl Heap for ScopedHeap {
    fn heap_id(&self) -> &str {
        self.base.heap_id()
    }

    fn resolve(&self, referencer: &Nut, path: &str) -> Result<Vec<Nut>> {
        let scoped = simplify_path(&merge_path(&[&self.root, path]));
        let resolved = self.base.resolve(referencer, &scoped)?;

        if resolved.is_empty() {
            self.fallback.resolve(referencer, path)
        } else {
            Ok(resolved)
        }
    }

    fn add_listener(&self, listener: Arc<dyn HeapListener>) {
        self.base.add_listener(listener);
    }
}
