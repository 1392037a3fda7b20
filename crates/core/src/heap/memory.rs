use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::Result;
use crate::heap::{Heap, HeapListener};
use crate::nut::{Nut, NutType};
use crate::util::simplify_path;

/// Map-backed heap, the default backend for tests and single-process
/// runtimes. Paths are stored slash-separated and resolved after `.` /
/// `..` simplification.
pub struct MemoryHeap {
    heap_id: String,
    entries: RwLock<HashMap<String, Entry>>,
    listeners: RwLock<HashMap<u64, Arc<dyn HeapListener>>>,
}

struct Entry {
    bytes: Arc<[u8]>,
    dynamic: bool,
    version: Option<u64>,
}

impl MemoryHeap {
    pub fn new(heap_id: impl Into<String>) -> MemoryHeap {
        MemoryHeap {
            heap_id: heap_id.into(),
            entries: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Registers content under a path-like name.
    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.insert_entry(name, bytes, false, None);
    }

    /// Registers dynamic content: results computed from it must not be
    /// cached as bytes.
    pub fn insert_dynamic(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.insert_entry(name, bytes, true, None);
    }

    /// Registers content with a pinned version number.
    pub fn insert_versioned(
        &self,
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        version: u64,
    ) {
        self.insert_entry(name, bytes, false, Some(version));
    }

    fn insert_entry(
        &self,
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        dynamic: bool,
        version: Option<u64>,
    ) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            name.into(),
            Entry {
                bytes: bytes.into().into(),
                dynamic,
                version,
            },
        );
    }

    /// Replaces content and notifies every registered listener, the
    /// signal caches react to by evicting dependent results.
    pub fn update(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.insert(name, bytes);
        self.notify_update();
    }

    /// Notifies listeners of a content change without touching entries.
    pub fn notify_update(&self) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        debug!(heap = %self.heap_id, count = listeners.len(), "notifying heap listeners");
        for listener in listeners.values() {
            listener.nut_updated(&self.heap_id);
        }
    }

    /// Builds a nut for an entry, reusing the stored bytes.
    fn nut_for(&self, name: &str, entry: &Entry) -> Option<Nut> {
        let nut_type = NutType::from_path(name)?;
        let mut nut = if entry.dynamic {
            Nut::from_source(name, Arc::new(StoredBytes(entry.bytes.clone())), true).ok()?
        } else {
            Nut::from_bytes(name, entry.bytes.to_vec()).ok()?
        };
        if let Some(version) = entry.version {
            nut.set_version(version);
        }
        debug_assert_eq!(nut.nut_type(), nut_type);
        Some(nut)
    }
}

struct StoredBytes(Arc<[u8]>);

impl crate::nut::ContentSource for StoredBytes {
    fn read(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_vec())
    }
}

impl Heap for MemoryHeap {
    fn heap_id(&self) -> &str {
        &self.heap_id
    }

    fn resolve(&self, _referencer: &Nut, path: &str) -> Result<Vec<Nut>> {
        let normalized = simplify_path(path);
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());

        Ok(entries
            .get(&normalized)
            .and_then(|entry| self.nut_for(&normalized, entry))
            .into_iter()
            .collect())
    }

    fn add_listener(&self, listener: Arc<dyn HeapListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.entry(listener.key()).or_insert(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        key: u64,
        hits: Arc<AtomicUsize>,
    }

    impl HeapListener for CountingListener {
        fn key(&self) -> u64 {
            self.key
        }

        fn nut_updated(&self, _heap_id: &str) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn listener_registration_is_idempotent_per_key() {
        let heap = MemoryHeap::new("wf");
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            heap.add_listener(Arc::new(CountingListener {
                key: 7,
                hits: hits.clone(),
            }));
        }

        heap.notify_update();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dynamic_entries_produce_dynamic_nuts() {
        let heap = MemoryHeap::new("wf");
        heap.insert_dynamic("live.js", b"now()".to_vec());

        let referencer = Nut::from_bytes("a.js", b"".to_vec()).unwrap();
        let resolved = heap.resolve(&referencer, "live.js").unwrap();
        assert!(resolved[0].is_dynamic());
        assert_eq!(resolved[0].bytes().unwrap(), b"now()");
    }
}
