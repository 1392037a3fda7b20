//! Bootstraps a ready-to-use processing pipeline.
//!
//! This crate acts as the central factory for the assetmill runtime,
//! assembling the default per-type chains, the size-bounded cache and
//! the tokio executor into one `Pipeline` value.

use std::collections::HashMap;
use std::sync::Arc;

use assetmill_core::heap::Heap;
use assetmill_core::nut::{Nut, NutType};
use assetmill_core::{MillError, Result};
use assetmill_engine::cache::{CacheStage, CacheStore, MemoryStore};
use assetmill_engine::chain::{Chain, Stage, chain};
use assetmill_engine::exec::TokioExecutor;
use assetmill_engine::request::RequestBuilder;
use assetmill_engine::stages::{
    Codec, CompressStage, MinifyStage, TextAggregatorStage, TextInspectorStage,
};

/// Default codec for the byte-compression stage.
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> ZstdCodec {
        ZstdCodec { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        ZstdCodec::new(3)
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(MillError::Io)
    }
}

/// Builder assembling a [`Pipeline`].
pub struct PipelineBuilder {
    heap: Arc<dyn Heap>,
    context_path: String,
    cache_budget: String,
    time_to_live: i64,
    best_effort: bool,
    cache_enabled: bool,
    compress: bool,
    codec: Option<Arc<dyn Codec>>,
    template_wrap: Option<String>,
}

impl PipelineBuilder {
    pub fn new(heap: Arc<dyn Heap>) -> PipelineBuilder {
        PipelineBuilder {
            heap,
            context_path: String::new(),
            cache_budget: "10MB".to_string(),
            time_to_live: -1,
            best_effort: false,
            cache_enabled: true,
            compress: true,
            codec: None,
            template_wrap: None,
        }
    }

    /// URL prefix used when rewriting references to served paths.
    pub fn context_path(mut self, context_path: impl Into<String>) -> PipelineBuilder {
        self.context_path = context_path.into();
        self
    }

    /// Cache memory budget, a numeric value optionally suffixed by KB
    /// or MB.
    pub fn cache_budget(mut self, budget: impl Into<String>) -> PipelineBuilder {
        self.cache_budget = budget.into();
        self
    }

    /// Seconds between scheduled full cache evictions; zero or less
    /// disables the schedule.
    pub fn time_to_live(mut self, seconds: i64) -> PipelineBuilder {
        self.time_to_live = seconds;
        self
    }

    pub fn best_effort(mut self, best_effort: bool) -> PipelineBuilder {
        self.best_effort = best_effort;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> PipelineBuilder {
        self.cache_enabled = enabled;
        self
    }

    pub fn compress(mut self, compress: bool) -> PipelineBuilder {
        self.compress = compress;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> PipelineBuilder {
        self.codec = Some(codec);
        self
    }

    /// Wrap pattern for the script template-URL convention; must
    /// contain a `%s` placeholder.
    pub fn template_wrap(mut self, wrap: impl Into<String>) -> PipelineBuilder {
        self.template_wrap = Some(wrap.into());
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let codec = self.codec.unwrap_or_else(|| Arc::new(ZstdCodec::default()));

        let script: Vec<Arc<dyn Stage>> = vec![
            Arc::new(TextInspectorStage::script(true, self.template_wrap.as_deref())?),
            Arc::new(MinifyStage::new(true)),
            Arc::new(TextAggregatorStage::new(true)),
            Arc::new(CompressStage::new(codec.clone(), self.compress)),
        ];
        let stylesheet: Vec<Arc<dyn Stage>> = vec![
            Arc::new(TextInspectorStage::stylesheet(true)),
            Arc::new(MinifyStage::new(true)),
            Arc::new(TextAggregatorStage::new(true)),
            Arc::new(CompressStage::new(codec, self.compress)),
        ];
        let markup: Vec<Arc<dyn Stage>> = vec![Arc::new(TextInspectorStage::markup(true))];

        let mut chains: HashMap<NutType, Arc<Chain>> = HashMap::new();
        chains.insert(NutType::Script, Arc::new(chain([script])));
        chains.insert(NutType::Stylesheet, Arc::new(chain([stylesheet])));
        chains.insert(NutType::Markup, Arc::new(chain([markup])));
        // Images and sourcemaps pass through untouched.

        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(&self.cache_budget)?);
        let cache = CacheStage::new(
            store,
            Arc::new(TokioExecutor),
            self.cache_enabled,
            self.best_effort,
        );
        cache.set_time_to_live(self.time_to_live);

        Ok(Pipeline {
            heap: self.heap,
            context_path: self.context_path,
            chains: Arc::new(chains),
            cache: Arc::new(cache),
        })
    }
}

/// A workflow-ready pipeline: chains per content type behind the cache
/// head stage.
pub struct Pipeline {
    heap: Arc<dyn Heap>,
    context_path: String,
    chains: Arc<HashMap<NutType, Arc<Chain>>>,
    cache: Arc<CacheStage>,
}

impl Pipeline {
    /// Processes the given units for a workflow, serving cached results
    /// when possible.
    pub async fn process(&self, workflow_id: &str, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        let request = RequestBuilder::new(workflow_id, self.heap.clone())
            .context_path(&self.context_path)
            .nuts(nuts)
            .chains(self.chains.as_ref().clone())
            .build();

        self.cache.parse(&request).await
    }

    /// Fetches one named unit of a workflow's result.
    pub async fn fetch(&self, workflow_id: &str, nuts: Vec<Nut>, path: &str) -> Result<Option<Nut>> {
        let request = RequestBuilder::new(workflow_id, self.heap.clone())
            .context_path(&self.context_path)
            .nuts(nuts)
            .chains(self.chains.as_ref().clone())
            .build();

        self.cache.parse_named(&request, path).await
    }

    pub fn cache(&self) -> &Arc<CacheStage> {
        &self.cache
    }
}

/// Initializes the logging system for a component, delegating to the
/// core logging module.
pub fn init_logging(component: &str) -> impl Drop {
    assetmill_core::logging::init_logging(component, false)
}
