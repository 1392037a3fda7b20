//! Stage contract and chain construction.
//!
//! A chain is an immutable, type-ordered sequence of stages with at
//! most one stage per concrete kind. Construction is a pure function
//! over possibly-overlapping partial sequences; execution walks the
//! sequence, skipping stages the request excludes.

use std::sync::Arc;

use tracing::debug;

use assetmill_core::Result;
use assetmill_core::nut::{Nut, merge_nuts};

use crate::request::{PipelineRequest, RequestBuilder, StageType};

/// A typed transformation stage consuming and producing ordered
/// sequences of content units.
pub trait Stage: Send + Sync {
    fn stage_type(&self) -> StageType;

    /// Concrete identity used for chain de-duplication: two stages with
    /// the same kind never both survive chain construction.
    fn kind(&self) -> &'static str;

    /// Whether the stage is configured to do anything. Disabled stages
    /// pass input through unchanged.
    fn works(&self) -> bool {
        true
    }

    fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>>;
}

/// An ordered, deduplicated sequence of stages.
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

/// Builds a chain out of one or more partial stage sequences.
///
/// The sequences are flattened, stable-sorted by stage type and
/// deduplicated by concrete kind. Among duplicates the instance nearest
/// the end of the flattened input wins, so a later-registered stage
/// overrides an earlier default of the same kind.
pub fn chain<I>(parts: I) -> Chain
where
    I: IntoIterator<Item = Vec<Arc<dyn Stage>>>,
{
    let mut flattened: Vec<Arc<dyn Stage>> = parts.into_iter().flatten().collect();
    flattened.sort_by_key(|s| s.stage_type());

    let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(flattened.len());

    for stage in &flattened {
        if stages.iter().any(|placed| placed.kind() == stage.kind()) {
            continue;
        }
        let winner = flattened
            .iter()
            .rev()
            .find(|candidate| candidate.kind() == stage.kind())
            .unwrap_or(stage);
        stages.push(winner.clone());
    }

    Chain { stages }
}

impl Chain {
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Whether a working stage of the given type is part of this chain.
    /// Inspectors use this to decide if downstream processing would
    /// invalidate a rewrite (e.g. sourcemaps broken by minification).
    pub fn has_working(&self, stage_type: StageType) -> bool {
        self.stages
            .iter()
            .any(|s| s.stage_type() == stage_type && s.works())
    }

    /// Runs the request's units through the chain. Stages whose type is
    /// in the request's skip set are forwarded over; disabled stages
    /// pass through unchanged. A stage failure aborts the chain.
    pub fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        let mut current = request.clone();

        for stage in &self.stages {
            if current.should_skip(stage.stage_type()) {
                debug!(kind = stage.kind(), "stage skipped by request");
                continue;
            }
            if !stage.works() {
                continue;
            }

            let nuts = stage.parse(&current)?;
            current = RequestBuilder::from_request(&current).nuts(nuts).build();
        }

        Ok(current.into_nuts())
    }
}

/// Executes a whole request: the units are grouped into maximal runs of
/// consecutive same-type units, each run is dispatched to the chain
/// registered for its type, and the concatenated results are merged by
/// final name unless one of them turned out to be unreachable.
pub fn run_chains(request: &PipelineRequest) -> Result<Vec<Nut>> {
    let mut retval: Vec<Nut> = Vec::new();

    for run in type_runs(request.nuts()) {
        let nut_type = run[0].nut_type();
        match request.chain_for(nut_type) {
            Some(chain) => {
                let sub = RequestBuilder::from_request(request).nuts(run).build();
                retval.extend(chain.parse(&sub)?);
            }
            // No chain registered for this type: pass through.
            None => retval.extend(run),
        }
    }

    // One unit can't be read: don't try to merge anything.
    if retval.iter().any(|nut| !nut.is_reachable()) {
        return Ok(retval);
    }

    merge_nuts(retval)
}

/// Splits units into maximal runs of consecutive same-type units.
fn type_runs(nuts: &[Nut]) -> Vec<Vec<Nut>> {
    let mut runs: Vec<Vec<Nut>> = Vec::new();

    for nut in nuts {
        match runs.last_mut() {
            Some(run) if run[0].nut_type() == nut.nut_type() => run.push(nut.clone()),
            _ => runs.push(vec![nut.clone()]),
        }
    }

    runs
}
