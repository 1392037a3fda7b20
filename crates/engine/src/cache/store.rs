//! Stores for cache results, including the size-bounded memory store
//! with disk spillover.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::{info, warn};

use assetmill_core::{MillError, Result};

use crate::cache::CacheResult;
use crate::request::RequestKey;

/// Keyed store of cache results.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &RequestKey) -> Option<CacheResult>;
    fn put(&self, key: RequestKey, result: CacheResult);
    fn remove(&self, key: &RequestKey);
    fn clear(&self);
}

enum Slot {
    Memory { result: CacheResult, size: u64 },
    /// Spilled to disk; the file is deleted when the slot is dropped.
    Disk { file: NamedTempFile },
}

struct Inner {
    map: HashMap<RequestKey, Slot>,
    used: u64,
}

/// In-memory store with a configurable memory budget. Results are kept
/// in memory while the budget allows, otherwise serialized to a
/// temporary file and fully read back on access.
///
/// Accounting only counts content bytes, not in-memory object overhead;
/// the effective footprint can exceed the configured limit by that
/// overhead. The map and the budget counter are mutated under one lock
/// so the budget cannot drift under concurrent put/remove.
pub struct MemoryStore {
    limit: u64,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Budget is a numeric value optionally suffixed by `KB` or `MB`.
    pub fn new(max_size: &str) -> Result<MemoryStore> {
        Ok(MemoryStore {
            limit: parse_size(max_size)?,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                used: 0,
            }),
        })
    }

    pub fn memory_in_use(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).used
    }

    fn spill(result: &CacheResult) -> Result<NamedTempFile> {
        let bytes = rmp_serde::to_vec(result)?;
        let mut file = NamedTempFile::new()?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    }

    fn unspill(file: &NamedTempFile) -> Result<CacheResult> {
        let mut bytes = Vec::new();
        file.reopen()?.read_to_end(&mut bytes)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &RequestKey) -> Option<CacheResult> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.map.get(key) {
            Some(Slot::Memory { result, .. }) => Some(result.clone()),
            Some(Slot::Disk { file }) => match MemoryStore::unspill(file) {
                Ok(result) => Some(result),
                Err(err) => {
                    warn!(%key, error = %err, "failed to read spilled cache result");
                    None
                }
            },
            None => None,
        }
    }

    fn put(&self, key: RequestKey, result: CacheResult) {
        let size = result.content_size();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Replacing an entry returns its budget first.
        if let Some(Slot::Memory { size, .. }) = inner.map.remove(&key) {
            inner.used -= size;
        }

        if inner.used + size > self.limit {
            info!(%key, size, "cache memory budget exceeded, spilling result to disk");
            match MemoryStore::spill(&result) {
                Ok(file) => {
                    inner.map.insert(key, Slot::Disk { file });
                    return;
                }
                Err(err) => {
                    // Better an oversized cache than a lost result.
                    warn!(%key, error = %err, "spillover failed, keeping result in memory");
                }
            }
        }

        inner.used += size;
        inner.map.insert(key, Slot::Memory { result, size });
    }

    fn remove(&self, key: &RequestKey) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(Slot::Memory { size, .. }) = inner.map.remove(key) {
            inner.used -= size;
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.clear();
        inner.used = 0;
    }
}

fn parse_size(value: &str) -> Result<u64> {
    let invalid = || {
        MillError::Config(format!(
            "'{value}' must be a numeric value optionally suffixed by KB or MB"
        ))
    };

    let upper = value.trim().to_ascii_uppercase();

    let (number, unit) = if let Some(rest) = upper.strip_suffix("KB") {
        (rest, 1024u64)
    } else if let Some(rest) = upper.strip_suffix("MB") {
        (rest, 1024 * 1024)
    } else {
        (upper.as_str(), 1)
    };

    let parsed: u64 = number.trim().parse().map_err(|_| invalid())?;
    Ok(parsed * unit)
}
