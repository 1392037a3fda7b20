//! Sourcemap comment handling: extracts `sourceMappingURL` references
//! or removes them when downstream processing would break the map.

use once_cell::sync::Lazy;
use regex::Regex;

use assetmill_core::Result;

use crate::request::StageType;
use crate::scan::inspector::{InspectContext, MatchEvent, SpanMatcher, resolve_reference};

static SOURCE_MAPPING_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sourceMappingURL=(\S+)").expect("sourcemap pattern"));

pub struct SourceMapMatcher;

impl SourceMapMatcher {
    /// A map referencing the pre-processed content is useless once a
    /// working minifier or aggregator runs after the inspection.
    fn downstream_breaks_map(ctx: &InspectContext<'_>) -> bool {
        let Some(chain) = ctx.request.chain_for(ctx.nut.nut_type()) else {
            return false;
        };

        [StageType::Minification, StageType::Aggregator]
            .into_iter()
            .any(|t| chain.has_working(t) && !ctx.request.should_skip(t))
    }
}

impl SpanMatcher for SourceMapMatcher {
    fn find(&mut self, hay: &str, start: usize, end: usize) -> Option<(usize, usize)> {
        let m = SOURCE_MAPPING_URL.find_at(hay, start)?;

        if m.start() >= end || m.end() > end {
            return None;
        }

        Some((m.start(), m.end()))
    }

    fn on_found(
        &mut self,
        content: &str,
        span: (usize, usize),
        ctx: &InspectContext<'_>,
    ) -> Result<Vec<MatchEvent>> {
        let statement = &content[span.0..span.1];
        let path = statement
            .split_once('=')
            .map(|(_, p)| p.trim_end_matches("*/").trim())
            .unwrap_or_default();

        // Already extracted for this unit: leave the statement alone.
        if ctx.nut.find_by_name(path).is_some() {
            return Ok(Vec::new());
        }

        if SourceMapMatcher::downstream_breaks_map(ctx) {
            return Ok(vec![MatchEvent {
                offset: span.0,
                length: span.1 - span.0,
                replacement: String::new(),
                extracted: Vec::new(),
            }]);
        }

        let resolved = resolve_reference(ctx, path)?;

        // The reference could not be resolved: a sourcemap can only be
        // referenced by URL, so keep the statement untouched.
        if resolved.extracted.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![MatchEvent {
            offset: span.0,
            length: span.1 - span.0,
            replacement: format!("sourceMappingURL={}", resolved.url),
            extracted: resolved.extracted,
        }])
    }
}
