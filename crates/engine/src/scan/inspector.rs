//! Inspector contract and the reference-resolution side-effect shared
//! by all concrete matchers.

use std::sync::Arc;

use tracing::{debug, warn};

use assetmill_core::Result;
use assetmill_core::heap::{Heap, derive_heap};
use assetmill_core::nut::Nut;
use assetmill_core::util::{merge_path, parent_dir, version_query};

use crate::request::{PipelineRequest, RequestBuilder, StageType};
use crate::scan::{Boundary, MatchCondition, ScriptScanner};

/// Stage types never re-entered while processing a unit extracted from
/// a reference: caching and aggregation would feed back into the very
/// computation that triggered the resolution.
pub const RESOLUTION_SKIP: [StageType; 4] = [
    StageType::Cache,
    StageType::Inspector,
    StageType::Aggregator,
    StageType::BinaryCompression,
];

/// One located reference: the byte span to replace, the replacement
/// text and the units extracted while resolving it.
#[derive(Debug)]
pub struct MatchEvent {
    pub offset: usize,
    pub length: usize,
    pub replacement: String,
    pub extracted: Vec<Nut>,
}

/// What an inspection runs against.
pub struct InspectContext<'a> {
    pub request: &'a PipelineRequest,
    pub nut: &'a Nut,
}

/// A stateful content inspector. `new_inspection` must be called once
/// per logical file before scanning that file's content.
pub trait Inspector: Send {
    fn new_inspection(&mut self);

    fn inspect(
        &mut self,
        content: &str,
        ctx: &InspectContext<'_>,
        sink: &mut dyn FnMut(MatchEvent),
    ) -> Result<()>;
}

/// Pattern matching within one eligible range.
pub trait SpanMatcher: Send {
    /// First occurrence within `hay[start..end)`, absolute offsets.
    fn find(&mut self, hay: &str, start: usize, end: usize) -> Option<(usize, usize)>;

    /// Builds the events for a located occurrence. `content` is the
    /// pristine text; the span was found over a possibly-blanked view.
    fn on_found(
        &mut self,
        content: &str,
        span: (usize, usize),
        ctx: &InspectContext<'_>,
    ) -> Result<Vec<MatchEvent>>;
}

/// Combines the lexical scanner with a pattern matcher: only spans
/// inside ranges eligible under the match condition are reported.
pub struct ScopedInspector<M> {
    scanner: ScriptScanner,
    matcher: M,
}

impl<M: SpanMatcher> ScopedInspector<M> {
    pub fn new(condition: MatchCondition, matcher: M) -> ScopedInspector<M> {
        ScopedInspector {
            scanner: ScriptScanner::new(condition),
            matcher,
        }
    }
}

impl<M: SpanMatcher> Inspector for ScopedInspector<M> {
    fn new_inspection(&mut self) {
        self.scanner.new_inspection();
    }

    fn inspect(
        &mut self,
        content: &str,
        ctx: &InspectContext<'_>,
        sink: &mut dyn FnMut(MatchEvent),
    ) -> Result<()> {
        let mut scratch = content.as_bytes().to_vec();
        let end = scratch.len();
        let mut start = 0;

        while let Some(range) = self.scanner.next_range(&mut scratch, start, end) {
            if range.boundary == Boundary::Continue {
                start = range.start;
                continue;
            }

            // Blanked bytes are plain spaces, so the scratch view stays
            // valid UTF-8 wherever the original was.
            let hay = std::str::from_utf8(&scratch).unwrap_or(content);

            let mut offset = range.start;
            while offset < range.end {
                let Some(span) = self.matcher.find(hay, offset, range.end) else {
                    break;
                };
                if span.1 <= span.0 {
                    break;
                }
                for event in self.matcher.on_found(content, span, ctx)? {
                    sink(event);
                }
                offset = span.1;
            }

            start = range.end.max(start + 1);
        }

        Ok(())
    }
}

/// Result of resolving one reference.
pub struct Resolved {
    /// Replacement text for the reference.
    pub url: String,
    /// Units extracted from the reference, already run through the
    /// chain registered for their type. Empty on fallback.
    pub extracted: Vec<Nut>,
}

/// Resolves a referenced path against a heap scoped to the referencing
/// unit's directory, runs the result through the chain registered for
/// its type and rewrites the reference to the served path.
///
/// An unresolvable reference degrades to a version-stamped literal
/// instead of failing the scan.
pub fn resolve_reference(ctx: &InspectContext<'_>, referenced_path: &str) -> Result<Resolved> {
    let request = ctx.request;
    let base: Arc<dyn Heap> = request.heap().clone();
    let heap = derive_heap(base.clone(), parent_dir(ctx.nut.name()), base);

    let found = heap.resolve(ctx.nut, referenced_path)?;
    let Some(first) = found.into_iter().next() else {
        warn!(
            path = referenced_path,
            referencer = ctx.nut.name(),
            "reference not resolvable, falling back to version query"
        );
        return Ok(Resolved {
            url: version_query(referenced_path, ctx.nut.version()?),
            extracted: Vec::new(),
        });
    };

    debug!(path = referenced_path, nut = first.name(), "reference resolved");
    let version = first.version()?;

    let extracted = match request.chain_for(first.nut_type()) {
        Some(chain) => {
            let sub = RequestBuilder::from_request(request)
                .nuts(vec![first.clone()])
                .heap(heap)
                .skip(&RESOLUTION_SKIP)
                .build();
            chain.parse(&sub)?
        }
        None => vec![first],
    };

    let served_name = extracted
        .first()
        .map(|nut| nut.name().to_string())
        .unwrap_or_else(|| referenced_path.to_string());

    let url = merge_path(&[
        "/",
        request.context_path(),
        request.workflow_id(),
        &version.to_string(),
        &served_name,
    ]);

    Ok(Resolved { url, extracted })
}

/// Applies replacement events to content, last span first so earlier
/// offsets stay valid. Overlapping spans are dropped.
pub fn apply_events(content: &str, mut events: Vec<MatchEvent>) -> (String, Vec<Nut>) {
    events.sort_by_key(|e| e.offset);

    let mut out = content.to_string();
    let mut extracted = Vec::new();
    let mut floor = usize::MAX;

    for event in events.into_iter().rev() {
        let end = event.offset + event.length;
        if end > floor || end > out.len() {
            warn!(offset = event.offset, "dropping overlapping replacement");
            continue;
        }
        out.replace_range(event.offset..end, &event.replacement);
        floor = event.offset;
        extracted.extend(event.extracted);
    }

    (out, extracted)
}
