//! Inspection stage: runs the scanning engine over each unit, rewrites
//! located references and attaches the extracted units.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use assetmill_core::nut::{Nut, NutType};
use assetmill_core::{MillError, Result};

use crate::chain::Stage;
use crate::request::{PipelineRequest, StageType};
use crate::scan::{
    CssUrlMatcher, InspectContext, Inspector, MarkupInspector, MatchCondition, MatchEvent,
    ScopedInspector, SourceMapMatcher, TagScanner, TemplateUrlMatcher, apply_events,
};

/// Builds a fresh inspector list for one unit inspection.
type InspectorFactory = Box<dyn Fn() -> Vec<Box<dyn Inspector>> + Send + Sync>;

pub struct TextInspectorStage {
    kind: &'static str,
    types: Vec<NutType>,
    factory: InspectorFactory,
    works: bool,
}

impl TextInspectorStage {
    pub fn new(
        kind: &'static str,
        types: Vec<NutType>,
        factory: InspectorFactory,
        works: bool,
    ) -> TextInspectorStage {
        TextInspectorStage {
            kind,
            types,
            factory,
            works,
        }
    }

    /// Stylesheet inspection: `url()` / `@import` extraction plus
    /// sourcemap comments.
    pub fn stylesheet(works: bool) -> TextInspectorStage {
        TextInspectorStage::new(
            "stylesheet-inspector",
            vec![NutType::Stylesheet],
            Box::new(|| {
                vec![
                    Box::new(ScopedInspector::new(MatchCondition::NoComment, CssUrlMatcher)),
                    Box::new(ScopedInspector::new(
                        MatchCondition::MultiLineComment,
                        SourceMapMatcher,
                    )),
                ]
            }),
            works,
        )
    }

    /// Script inspection: sourcemap comments and the template-URL
    /// convention. The wrap pattern must contain a `%s` placeholder
    /// when given.
    pub fn script(works: bool, wrap_pattern: Option<&str>) -> Result<TextInspectorStage> {
        // A bad wrap pattern fails construction, not the first
        // inspection.
        let template = TemplateUrlMatcher::new(wrap_pattern)?;

        Ok(TextInspectorStage::new(
            "script-inspector",
            vec![NutType::Script],
            Box::new(move || {
                vec![
                    Box::new(ScopedInspector::new(
                        MatchCondition::SingleLineComment,
                        SourceMapMatcher,
                    )),
                    Box::new(ScopedInspector::new(
                        MatchCondition::MultiLineComment,
                        SourceMapMatcher,
                    )),
                    Box::new(ScopedInspector::new(
                        MatchCondition::NoComment,
                        template.clone(),
                    )),
                ]
            }),
            works,
        ))
    }

    /// Markup inspection driven by the built-in tag/attribute scanner.
    pub fn markup(works: bool) -> TextInspectorStage {
        TextInspectorStage::new(
            "markup-inspector",
            vec![NutType::Markup],
            Box::new(|| vec![Box::new(MarkupInspector::new(Arc::new(TagScanner)))]),
            works,
        )
    }

    fn inspect_nut(&self, nut: &mut Nut, request: &PipelineRequest) -> Result<()> {
        if !nut.is_reachable() {
            return Ok(());
        }

        let content = nut.text()?;
        let mut events: Vec<MatchEvent> = Vec::new();

        {
            let ctx = InspectContext { request, nut };
            for mut inspector in (self.factory)() {
                inspector.new_inspection();
                inspector.inspect(&content, &ctx, &mut |event| events.push(event))?;
            }
        }

        if events.is_empty() {
            return Ok(());
        }

        debug!(nut = nut.name(), count = events.len(), "references rewritten");
        let (rewritten, extracted) = apply_events(&content, events);
        nut.set_bytes(rewritten.into_bytes());

        for reference in extracted {
            nut.add_reference(reference);
        }

        Ok(())
    }

    /// Extracted stylesheets are themselves inspected, so transitively
    /// imported units end up referenced as well. A name guard bounds
    /// circular imports.
    fn inspect_extracted(&self, nut: &mut Nut, request: &PipelineRequest) -> Result<()> {
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(nut.name().to_string());
        self.inspect_referenced_stylesheets(nut, request, &mut seen)
    }

    fn inspect_referenced_stylesheets(
        &self,
        nut: &mut Nut,
        request: &PipelineRequest,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let mut referenced = std::mem::take(nut.referenced_mut());

        for reference in &mut referenced {
            if reference.nut_type() != NutType::Stylesheet {
                continue;
            }
            if !seen.insert(reference.name().to_string()) {
                continue;
            }
            self.inspect_nut(reference, request)?;
            self.inspect_referenced_stylesheets(reference, request, seen)?;
        }

        *nut.referenced_mut() = referenced;
        Ok(())
    }
}

impl Stage for TextInspectorStage {
    fn stage_type(&self) -> StageType {
        StageType::Inspector
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn works(&self) -> bool {
        self.works
    }

    fn parse(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        let mut out = Vec::with_capacity(request.nuts().len());

        for nut in request.nuts() {
            if !self.types.contains(&nut.nut_type()) {
                out.push(nut.clone());
                continue;
            }

            let mut nut = nut.clone();
            self.inspect_nut(&mut nut, request)
                .map_err(|e| stage_error(self.kind, request, e))?;
            self.inspect_extracted(&mut nut, request)
                .map_err(|e| stage_error(self.kind, request, e))?;
            out.push(nut);
        }

        Ok(out)
    }
}

fn stage_error(kind: &'static str, request: &PipelineRequest, err: MillError) -> MillError {
    match err {
        tagged @ (MillError::Stage { .. } | MillError::Inconsistency(_)) => tagged,
        other => MillError::Stage {
            kind,
            workflow: request.workflow_id().to_string(),
            detail: other.to_string(),
        },
    }
}
