//! The cache head stage.
//!
//! On a hit the cached units are returned and no stage runs. On a miss
//! the chain executes and the serialized result is stored. In best
//! effort mode the miss path runs a reduced chain, answers immediately
//! and promotes the fast result to a fully processed one on the
//! executor; at most one full computation is in flight per request key.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use dashmap::DashSet;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use assetmill_core::heap::HeapListener;
use assetmill_core::nut::Nut;
use assetmill_core::{MillError, Result};

use crate::cache::{CacheResult, CacheStore, EntryMap, entries_to_nuts, entry_map};
use crate::chain::run_chains;
use crate::exec::Executor;
use crate::request::{PipelineRequest, RequestBuilder, RequestKey, StageType};

/// Name prefix distinguishing best-effort output from the fully
/// processed output of the same workflow.
pub const BEST_EFFORT_PREFIX: &str = "best-effort";

type SharedComputation = Shared<BoxFuture<'static, std::result::Result<Arc<EntryMap>, Arc<MillError>>>>;

pub struct CacheStage {
    do_cache: bool,
    best_effort: bool,
    store: Arc<dyn CacheStore>,
    executor: Arc<dyn Executor>,
    pending_default: Arc<Mutex<HashMap<RequestKey, SharedComputation>>>,
    pending_best_effort: Arc<Mutex<HashMap<RequestKey, EntryMap>>>,
    registered: Arc<DashSet<RequestKey>>,
    ttl_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CacheStage {
    pub fn new(
        store: Arc<dyn CacheStore>,
        executor: Arc<dyn Executor>,
        do_cache: bool,
        best_effort: bool,
    ) -> CacheStage {
        CacheStage {
            do_cache,
            best_effort,
            store,
            executor,
            pending_default: Arc::new(Mutex::new(HashMap::new())),
            pending_best_effort: Arc::new(Mutex::new(HashMap::new())),
            registered: Arc::new(DashSet::new()),
            ttl_task: Mutex::new(None),
        }
    }

    pub fn stage_type(&self) -> StageType {
        StageType::Cache
    }

    pub fn works(&self) -> bool {
        self.do_cache
    }

    /// Schedules a periodic full clear of the cache. A value of zero or
    /// less disables scheduled eviction; reconfiguring replaces any
    /// previous schedule. Requires a running tokio runtime.
    pub fn set_time_to_live(&self, seconds: i64) {
        let mut slot = self.ttl_task.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(task) = slot.take() {
            task.abort();
        }

        if seconds <= 0 {
            return;
        }

        let store = self.store.clone();
        let registered = self.registered.clone();
        let period = std::time::Duration::from_secs(seconds as u64);

        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                info!("time-to-live reached, clearing cache");
                store.clear();
                registered.clear();
            }
        }));
    }

    /// Parses the request, serving from the cache when possible.
    pub async fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        if !self.do_cache {
            return run_chains(request);
        }

        let key = request.key().clone();

        if let Some(cached) = self.store.get(&key) {
            info!(%key, "units found in cache");
            let map = cached
                .default
                .or(cached.best_effort)
                .ok_or_else(|| MillError::Inconsistency(format!("empty cache result for '{key}'")))?;
            return entries_to_nuts(&map, request);
        }

        // Future content updates must evict whatever gets stored.
        self.register_invalidation(request, &key);

        if self.best_effort {
            self.parse_best_effort(request, key).await
        } else {
            let computation = CacheStage::default_computation(
                &self.store,
                &self.executor,
                &self.pending_default,
                request,
                &key,
            );
            let map = computation.await.map_err(MillError::Async)?;
            entries_to_nuts(&map, request)
        }
    }

    /// Runs the reduced chain, answers with its result and schedules
    /// the full computation asynchronously.
    async fn parse_best_effort(&self, request: &PipelineRequest, key: RequestKey) -> Result<Vec<Nut>> {
        let reduced = RequestBuilder::from_request(request)
            .prefix_created_nut(BEST_EFFORT_PREFIX)
            .skip(&[
                StageType::Aggregator,
                StageType::BinaryCompression,
                StageType::Minification,
            ])
            .best_effort()
            .build();

        let nuts = run_chains(&reduced)?;

        // The prefix keeps these names disjoint from the full result.
        let frozen = nuts
            .into_iter()
            .map(|nut| nut.with_prefix(BEST_EFFORT_PREFIX).to_static())
            .collect::<Result<Vec<_>>>()?;
        let map = entry_map(&frozen)?;

        let schedule = {
            let mut pending = self
                .pending_best_effort
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if pending.contains_key(&key) {
                false
            } else {
                pending.insert(key.clone(), map.clone());
                true
            }
        };

        if schedule {
            self.spawn_promotion(request.clone(), key, map);
        }

        Ok(frozen)
    }

    /// Stores the best-effort result, then schedules the full
    /// computation. Runs detached: the caller already has its answer.
    fn spawn_promotion(&self, request: PipelineRequest, key: RequestKey, map: EntryMap) {
        let store = self.store.clone();
        let executor = self.executor.clone();
        let pending_default = self.pending_default.clone();
        let pending_best_effort = self.pending_best_effort.clone();

        tokio::spawn(async move {
            debug!(%key, "storing best-effort result");
            store.put(key.clone(), CacheResult::best_effort_only(map));

            // The full computation registers itself in the pending map
            // before the best-effort slot is dropped, so named lookups
            // always see one of the two.
            let computation =
                CacheStage::default_computation(&store, &executor, &pending_default, &request, &key);

            pending_best_effort
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);

            if let Err(err) = computation.await {
                warn!(%key, error = %err, "deferred full computation failed");
            }
        });
    }

    /// Returns the in-flight full computation for the key, starting one
    /// when none exists. All concurrent callers share the same future;
    /// the pending entry is removed on completion, success or failure,
    /// so a later request may retry.
    fn default_computation(
        store: &Arc<dyn CacheStore>,
        executor: &Arc<dyn Executor>,
        pending_default: &Arc<Mutex<HashMap<RequestKey, SharedComputation>>>,
        request: &PipelineRequest,
        key: &RequestKey,
    ) -> SharedComputation {
        let mut pending = pending_default.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = pending.get(key) {
            debug!(%key, "joining in-flight computation");
            return existing.clone();
        }

        let store = store.clone();
        let executor = executor.clone();
        let pending_map = pending_default.clone();
        let request = request.clone();
        let key_owned = key.clone();

        let computation: SharedComputation = async move {
            let outcome: std::result::Result<Arc<EntryMap>, Arc<MillError>> = async {
                let full = RequestBuilder::from_request(&request)
                    .disable_best_effort()
                    .build();
                let completion = executor.spawn(Box::new(move || run_chains(&full)));
                let nuts = completion.wait().await.map_err(MillError::shared)?;

                let frozen = nuts
                    .iter()
                    .map(Nut::to_static)
                    .collect::<Result<Vec<_>>>()
                    .map_err(MillError::shared)?;
                let map = entry_map(&frozen).map_err(MillError::shared)?;

                debug!(key = %request.key(), "caching fully processed units");
                let mut cached = store.get(request.key()).unwrap_or_default();
                cached.default = Some(map.clone());
                store.put(request.key().clone(), cached);

                Ok(Arc::new(map))
            }
            .await;

            pending_map
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key_owned);

            outcome
        }
        .boxed()
        .shared();

        pending.insert(key.clone(), computation.clone());

        // Drive the computation even when every caller drops early.
        tokio::spawn(computation.clone().map(|_| ()));

        computation
    }

    /// Parses the request and returns the single unit with the given
    /// name, without converting the whole result when avoidable.
    pub async fn parse_named(&self, request: &PipelineRequest, path: &str) -> Result<Option<Nut>> {
        if !self.do_cache {
            let nuts = run_chains(request)?;
            return Ok(nuts.iter().find_map(|nut| nut.find_by_name(path)).cloned());
        }

        let key = request.key().clone();

        if path.starts_with(BEST_EFFORT_PREFIX) {
            let map = self.best_effort_map(request, &key).await?;
            return lookup(&map, path, request);
        }

        // Await any in-flight full computation first; its failure is
        // the caller's failure.
        let computation = {
            let pending = self
                .pending_default
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.get(&key).cloned()
        };
        if let Some(computation) = computation {
            computation.await.map_err(MillError::Async)?;
        }

        if let Some(map) = self.store.get(&key).and_then(|r| r.default) {
            return lookup(&map, path, request);
        }

        // Nothing computed yet for this key: compute, then look again.
        Box::pin(self.parse(request)).await?;

        match self.store.get(&key).and_then(|r| r.default.or(r.best_effort)) {
            Some(map) => lookup(&map, path, request),
            None => Ok(None),
        }
    }

    /// The best-effort map for a key: in-flight promotion first, then
    /// the store, computing from scratch as a last resort.
    async fn best_effort_map(&self, request: &PipelineRequest, key: &RequestKey) -> Result<EntryMap> {
        let in_flight = {
            let pending = self
                .pending_best_effort
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.get(key).cloned()
        };

        if let Some(map) = in_flight {
            return Ok(map);
        }
        if let Some(map) = self.store.get(key).and_then(|r| r.best_effort) {
            return Ok(map);
        }

        Box::pin(self.parse(request)).await?;

        let in_flight = {
            let pending = self
                .pending_best_effort
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.get(key).cloned()
        };

        in_flight
            .or_else(|| self.store.get(key).and_then(|r| r.best_effort))
            .ok_or_else(|| {
                MillError::Inconsistency(format!("no best-effort result computed for '{key}'"))
            })
    }

    fn register_invalidation(&self, request: &PipelineRequest, key: &RequestKey) {
        if !self.registered.insert(key.clone()) {
            return;
        }

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);

        request.heap().add_listener(Arc::new(InvalidateCache {
            key: key.clone(),
            listener_key: hasher.finish(),
            store: self.store.clone(),
        }));
    }
}

/// Evicts one cache key when the heap signals a content update.
struct InvalidateCache {
    key: RequestKey,
    listener_key: u64,
    store: Arc<dyn CacheStore>,
}

impl HeapListener for InvalidateCache {
    fn key(&self) -> u64 {
        self.listener_key
    }

    fn nut_updated(&self, heap_id: &str) {
        debug!(key = %self.key, heap = heap_id, "content update, evicting cache entry");
        self.store.remove(&self.key);
    }
}

fn lookup(map: &EntryMap, path: &str, request: &PipelineRequest) -> Result<Option<Nut>> {
    for entry in map.values() {
        if let Some(found) = entry.find(path) {
            return Ok(Some(found.to_nut(request)?));
        }
    }

    Ok(None)
}
