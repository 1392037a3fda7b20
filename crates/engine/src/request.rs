//! The unit of work flowing through a chain: input units, the chain
//! registered per content type, the skip set and the memoized cache key.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use assetmill_core::heap::Heap;
use assetmill_core::nut::{Nut, NutType};

use crate::chain::Chain;

/// Fixed, ordered set of stage categories. Chain position is governed
/// by this ordering: cache first, then inspection, minification,
/// aggregation and finally byte compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageType {
    Cache,
    Inspector,
    Minification,
    Aggregator,
    BinaryCompression,
}

impl StageType {
    pub const ALL: [StageType; 5] = [
        StageType::Cache,
        StageType::Inspector,
        StageType::Minification,
        StageType::Aggregator,
        StageType::BinaryCompression,
    ];

    /// All stage types except the given ones.
    pub fn without(excluded: &[StageType]) -> Vec<StageType> {
        StageType::ALL
            .into_iter()
            .filter(|t| !excluded.contains(t))
            .collect()
    }
}

/// Cache identity of a request: two requests with an equal key are
/// cache-equivalent regardless of unit object identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    workflow: String,
    nuts: Vec<String>,
    skip: Vec<StageType>,
}

impl RequestKey {
    fn new(workflow: &str, nuts: &[Nut], skip: &[StageType]) -> RequestKey {
        let mut names: Vec<String> = nuts.iter().map(|n| n.name().to_string()).collect();
        names.sort();
        names.dedup();
        let mut skip = skip.to_vec();
        skip.sort();
        skip.dedup();

        RequestKey {
            workflow: workflow.to_string(),
            nuts: names,
            skip,
        }
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {:?}", self.workflow, self.nuts)
    }
}

/// A processing request.
#[derive(Clone)]
pub struct PipelineRequest {
    workflow_id: String,
    context_path: String,
    nuts: Vec<Nut>,
    heap: Arc<dyn Heap>,
    chains: Arc<HashMap<NutType, Arc<Chain>>>,
    skip: Vec<StageType>,
    best_effort: bool,
    prefix: String,
    key: Arc<OnceCell<RequestKey>>,
}

impl PipelineRequest {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn nuts(&self) -> &[Nut] {
        &self.nuts
    }

    pub fn into_nuts(self) -> Vec<Nut> {
        self.nuts
    }

    pub fn heap(&self) -> &Arc<dyn Heap> {
        &self.heap
    }

    pub fn chain_for(&self, nut_type: NutType) -> Option<&Arc<Chain>> {
        self.chains.get(&nut_type)
    }

    pub fn should_skip(&self, stage_type: StageType) -> bool {
        self.skip.contains(&stage_type)
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Prefix applied to names of units created by stages, used to keep
    /// best-effort output distinct from the fully processed output.
    pub fn created_nut_prefix(&self) -> &str {
        &self.prefix
    }

    /// The cache key, computed once per request and memoized.
    pub fn key(&self) -> &RequestKey {
        self.key
            .get_or_init(|| RequestKey::new(&self.workflow_id, &self.nuts, &self.skip))
    }
}

impl std::fmt::Debug for PipelineRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRequest")
            .field("workflow_id", &self.workflow_id)
            .field("nuts", &self.nuts.iter().map(Nut::name).collect::<Vec<_>>())
            .field("skip", &self.skip)
            .field("best_effort", &self.best_effort)
            .finish()
    }
}

/// Builder for requests, either from scratch or derived from an
/// existing request (sub-requests keep the workflow, chains and heap
/// unless overridden).
pub struct RequestBuilder {
    workflow_id: String,
    context_path: String,
    nuts: Vec<Nut>,
    heap: Arc<dyn Heap>,
    chains: Arc<HashMap<NutType, Arc<Chain>>>,
    skip: Vec<StageType>,
    best_effort: bool,
    prefix: String,
}

impl RequestBuilder {
    pub fn new(workflow_id: impl Into<String>, heap: Arc<dyn Heap>) -> RequestBuilder {
        RequestBuilder {
            workflow_id: workflow_id.into(),
            context_path: String::new(),
            nuts: Vec::new(),
            heap,
            chains: Arc::new(HashMap::new()),
            skip: Vec::new(),
            best_effort: false,
            prefix: String::new(),
        }
    }

    /// Derives a builder from an existing request. The key is always
    /// recomputed: derived requests usually change the nut set or the
    /// skip set.
    pub fn from_request(request: &PipelineRequest) -> RequestBuilder {
        RequestBuilder {
            workflow_id: request.workflow_id.clone(),
            context_path: request.context_path.clone(),
            nuts: request.nuts.clone(),
            heap: request.heap.clone(),
            chains: request.chains.clone(),
            skip: request.skip.clone(),
            best_effort: request.best_effort,
            prefix: request.prefix.clone(),
        }
    }

    pub fn context_path(mut self, context_path: impl Into<String>) -> RequestBuilder {
        self.context_path = context_path.into();
        self
    }

    pub fn nuts(mut self, nuts: Vec<Nut>) -> RequestBuilder {
        self.nuts = nuts;
        self
    }

    pub fn heap(mut self, heap: Arc<dyn Heap>) -> RequestBuilder {
        self.heap = heap;
        self
    }

    pub fn chains(mut self, chains: HashMap<NutType, Arc<Chain>>) -> RequestBuilder {
        self.chains = Arc::new(chains);
        self
    }

    /// Adds stage types to the skip set.
    pub fn skip(mut self, types: &[StageType]) -> RequestBuilder {
        for t in types {
            if !self.skip.contains(t) {
                self.skip.push(*t);
            }
        }
        self
    }

    pub fn best_effort(mut self) -> RequestBuilder {
        self.best_effort = true;
        self
    }

    pub fn disable_best_effort(mut self) -> RequestBuilder {
        self.best_effort = false;
        self
    }

    pub fn prefix_created_nut(mut self, prefix: impl Into<String>) -> RequestBuilder {
        self.prefix = prefix.into();
        self
    }

    pub fn build(self) -> PipelineRequest {
        PipelineRequest {
            workflow_id: self.workflow_id,
            context_path: self.context_path,
            nuts: self.nuts,
            heap: self.heap,
            chains: self.chains,
            skip: self.skip,
            best_effort: self.best_effort,
            prefix: self.prefix,
            key: Arc::new(OnceCell::new()),
        }
    }
}
