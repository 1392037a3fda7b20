//! End-to-end cache behavior: concurrent de-duplication, best-effort
//! promotion and heap-driven invalidation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assetmill_core::heap::MemoryHeap;
use assetmill_core::nut::{Nut, NutType};
use assetmill_core::Result;
use assetmill_engine::cache::{BEST_EFFORT_PREFIX, CacheStage, CacheStore, MemoryStore};
use assetmill_engine::chain::{Chain, Stage, chain};
use assetmill_engine::exec::TokioExecutor;
use assetmill_engine::request::{PipelineRequest, RequestBuilder, StageType};
use assetmill_engine::stages::TextAggregatorStage;

/// Minification stand-in that counts its executions.
struct CountingMinify {
    calls: Arc<AtomicUsize>,
}

impl Stage for CountingMinify {
    fn stage_type(&self) -> StageType {
        StageType::Minification
    }

    fn kind(&self) -> &'static str {
        "counting-minify"
    }

    fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        request
            .nuts()
            .iter()
            .map(|nut| {
                let mut out = nut.clone();
                let text = nut.text()?.replace(" // c", "");
                out.set_bytes(text.into_bytes());
                Ok(out)
            })
            .collect()
    }
}

struct Fixture {
    cache: Arc<CacheStage>,
    store: Arc<MemoryStore>,
    heap: Arc<MemoryHeap>,
    chains: HashMap<NutType, Arc<Chain>>,
    calls: Arc<AtomicUsize>,
}

fn fixture(best_effort: bool) -> Fixture {
    let calls = Arc::new(AtomicUsize::new(0));
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(CountingMinify {
            calls: calls.clone(),
        }),
        Arc::new(TextAggregatorStage::new(true)),
    ];

    let mut chains = HashMap::new();
    chains.insert(NutType::Script, Arc::new(chain([stages])));

    let store = Arc::new(MemoryStore::new("10MB").expect("budget"));
    let cache = Arc::new(CacheStage::new(
        store.clone() as Arc<dyn CacheStore>,
        Arc::new(TokioExecutor),
        true,
        best_effort,
    ));

    Fixture {
        cache,
        store,
        heap: Arc::new(MemoryHeap::new("wf")),
        chains,
        calls,
    }
}

impl Fixture {
    fn request(&self) -> PipelineRequest {
        let nuts = vec![
            Nut::from_bytes("a.js", b"var a = 1; // c\n".to_vec()).expect("nut"),
            Nut::from_bytes("b.js", b"var b = 2;\n".to_vec()).expect("nut"),
        ];
        RequestBuilder::new("wf", self.heap.clone())
            .nuts(nuts)
            .chains(self.chains.clone())
            .build()
    }

    /// Waits for the deferred full computation to land in the store.
    async fn await_promotion(&self) {
        let key = self.request().key().clone();
        for _ in 0..200 {
            if self
                .store
                .get(&key)
                .is_some_and(|result| result.default.is_some())
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("promotion never completed");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_computation() {
    let fx = fixture(false);

    let results = futures::future::join_all((0..4).map(|_| {
        let cache = fx.cache.clone();
        let request = fx.request();
        async move { cache.parse(&request).await }
    }))
    .await;

    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);

    let names: Vec<Vec<String>> = results
        .into_iter()
        .map(|r| {
            r.expect("parse")
                .iter()
                .map(|n| n.name().to_string())
                .collect()
        })
        .collect();

    for other in &names[1..] {
        assert_eq!(&names[0], other);
    }
    assert_eq!(names[0], vec!["aggregate.js".to_string()]);
}

#[tokio::test]
async fn cache_hit_skips_the_chain() {
    let fx = fixture(false);

    let first = fx.cache.parse(&fx.request()).await.expect("first");
    let second = fx.cache.parse(&fx.request()).await.expect("second");

    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first[0].name(), second[0].name());
    assert_eq!(
        first[0].bytes().expect("bytes"),
        second[0].bytes().expect("bytes")
    );
}

#[tokio::test]
async fn best_effort_answers_fast_and_promotes() {
    let fx = fixture(true);

    let fast = fx.cache.parse(&fx.request()).await.expect("fast");

    // Reduced chain: no minification, no aggregation, prefixed names.
    assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    let names: Vec<&str> = fast.iter().map(|n| n.name()).collect();
    assert_eq!(names, vec!["best-effort/a.js", "best-effort/b.js"]);
    assert!(fast[0].text().expect("text").contains("// c"));

    fx.await_promotion().await;
    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);

    // The promoted result is served without re-running the chain.
    let full = fx.cache.parse(&fx.request()).await.expect("full");
    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    assert_eq!(full.len(), 1);
    assert_eq!(full[0].name(), "aggregate.js");
    assert!(!full[0].text().expect("text").contains("// c"));
}

#[tokio::test]
async fn heap_update_invalidates_the_key() {
    let fx = fixture(false);

    fx.cache.parse(&fx.request()).await.expect("first");
    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);

    fx.heap.notify_update();

    fx.cache.parse(&fx.request()).await.expect("second");
    assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn named_lookup_waits_for_the_full_result() {
    let fx = fixture(true);

    let fast = fx.cache.parse(&fx.request()).await.expect("fast");
    assert!(!fast.is_empty());

    fx.await_promotion().await;

    let named = fx
        .cache
        .parse_named(&fx.request(), "aggregate.js")
        .await
        .expect("named");
    assert_eq!(named.expect("present").name(), "aggregate.js");

    // Units merged into the composite stay reachable by name.
    let part = fx
        .cache
        .parse_named(&fx.request(), "a.js")
        .await
        .expect("named");
    assert_eq!(part.expect("present").name(), "a.js");
}

#[tokio::test]
async fn best_effort_named_lookup_uses_the_fast_result() {
    let fx = fixture(true);

    let named = fx
        .cache
        .parse_named(&fx.request(), &format!("{BEST_EFFORT_PREFIX}/a.js"))
        .await
        .expect("named");

    let nut = named.expect("present");
    assert_eq!(nut.name(), "best-effort/a.js");
    assert!(nut.text().expect("text").contains("// c"));
}

#[tokio::test]
async fn disabled_cache_runs_the_chain_every_time() {
    let calls = Arc::new(AtomicUsize::new(0));
    let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(CountingMinify {
        calls: calls.clone(),
    })];
    let mut chains = HashMap::new();
    chains.insert(NutType::Script, Arc::new(chain([stages])));

    let cache = CacheStage::new(
        Arc::new(MemoryStore::new("1MB").expect("budget")) as Arc<dyn CacheStore>,
        Arc::new(TokioExecutor),
        false,
        false,
    );

    let heap = Arc::new(MemoryHeap::new("wf"));
    let request = || {
        RequestBuilder::new("wf", heap.clone())
            .nuts(vec![Nut::from_bytes("a.js", b"x;".to_vec()).expect("nut")])
            .chains(chains.clone())
            .build()
    };

    cache.parse(&request()).await.expect("first");
    cache.parse(&request()).await.expect("second");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
