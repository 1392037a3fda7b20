//! Stylesheet reference extraction: `url(...)` statements and
//! `@import` directives.

use once_cell::sync::Lazy;
use regex::Regex;

use assetmill_core::Result;

use crate::scan::inspector::{InspectContext, MatchEvent, SpanMatcher, resolve_reference};

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)@import\s+url\(\s*['"]?([^'")]+?)['"]?\s*\)|@import\s+['"]([^'"]+)['"]|url\(\s*['"]?([^'")]+?)['"]?\s*\)"#,
    )
    .expect("css url pattern")
});

/// Matches CSS `url()` / `@import` statements and rewrites the
/// referenced path. Absolute and `data:` URLs pass through untouched.
pub struct CssUrlMatcher;

impl CssUrlMatcher {
    fn is_external(path: &str) -> bool {
        path.starts_with("http://")
            || path.starts_with("https://")
            || path.starts_with('/')
            || path.starts_with("data:")
    }
}

impl SpanMatcher for CssUrlMatcher {
    fn find(&mut self, hay: &str, start: usize, end: usize) -> Option<(usize, usize)> {
        let captures = CSS_URL.captures_at(hay, start)?;
        let group = captures.iter().skip(1).flatten().next()?;

        if group.start() >= end || group.end() > end {
            return None;
        }

        Some((group.start(), group.end()))
    }

    fn on_found(
        &mut self,
        content: &str,
        span: (usize, usize),
        ctx: &InspectContext<'_>,
    ) -> Result<Vec<MatchEvent>> {
        let path = content[span.0..span.1].trim();

        if CssUrlMatcher::is_external(path) {
            return Ok(Vec::new());
        }

        let resolved = resolve_reference(ctx, path)?;

        Ok(vec![MatchEvent {
            offset: span.0,
            length: span.1 - span.0,
            replacement: resolved.url,
            extracted: resolved.extracted,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_of(content: &str) -> Option<String> {
        let mut matcher = CssUrlMatcher;
        matcher
            .find(content, 0, content.len())
            .map(|(s, e)| content[s..e].to_string())
    }

    #[test]
    fn matches_url_statements() {
        assert_eq!(group_of("a { background: url(img/bg.png); }").as_deref(), Some("img/bg.png"));
        assert_eq!(group_of("a { background: url( 'b.png' ); }").as_deref(), Some("b.png"));
        assert_eq!(group_of(r#"a { background: url("c.png"); }"#).as_deref(), Some("c.png"));
    }

    #[test]
    fn matches_import_directives() {
        assert_eq!(group_of("@import url(base.css);").as_deref(), Some("base.css"));
        assert_eq!(group_of("@import 'theme.css';").as_deref(), Some("theme.css"));
        assert_eq!(group_of("@IMPORT \"upper.css\";").as_deref(), Some("upper.css"));
    }

    #[test]
    fn no_match_in_plain_css() {
        assert_eq!(group_of("a { color: red; }"), None);
    }
}
