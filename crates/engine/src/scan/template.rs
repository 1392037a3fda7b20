//! Client-framework template references in scripts: rewrites the
//! `templateUrl` convention to served paths, optionally inside a
//! caller-provided wrap pattern.

use regex::Regex;

use assetmill_core::{MillError, Result};

use crate::scan::inspector::{InspectContext, MatchEvent, SpanMatcher, resolve_reference};

const STRING_LITERAL: &str = r#"'([^']+)'|"([^"]+)""#;

#[derive(Clone)]
pub struct TemplateUrlMatcher {
    pattern: Regex,
}

impl TemplateUrlMatcher {
    /// Builds a matcher for `templateUrl` statements. A non-empty wrap
    /// pattern wraps the URL literal (e.g. `fn(%s)`) and must contain
    /// the `%s` placeholder for the string literal.
    pub fn new(wrap_pattern: Option<&str>) -> Result<TemplateUrlMatcher> {
        let literal = format!("(?:{STRING_LITERAL})");

        let value = match wrap_pattern {
            Some(wrap) if !wrap.is_empty() => {
                if !wrap.contains("%s") {
                    return Err(MillError::Config(format!(
                        "wrap pattern '{wrap}' does not contain the %s placeholder"
                    )));
                }
                regex::escape(wrap).replace("%s", &literal)
            }
            _ => literal,
        };

        let pattern = Regex::new(&format!(r"templateUrl\s*:\s*{value}"))
            .map_err(|e| MillError::Config(format!("invalid wrap pattern: {e}")))?;

        Ok(TemplateUrlMatcher { pattern })
    }
}

impl SpanMatcher for TemplateUrlMatcher {
    fn find(&mut self, hay: &str, start: usize, end: usize) -> Option<(usize, usize)> {
        let captures = self.pattern.captures_at(hay, start)?;
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
        let path = &content[span.0..span.1];
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

    #[test]
    fn matches_quoted_template_url() {
        let mut matcher = TemplateUrlMatcher::new(None).unwrap();
        let content = "return { templateUrl  : 'my-customer.html' };";
        let (s, e) = matcher.find(content, 0, content.len()).unwrap();
        assert_eq!(&content[s..e], "my-customer.html");
    }

    #[test]
    fn wrap_pattern_wraps_the_literal() {
        let mut matcher = TemplateUrlMatcher::new(Some("fn(%s)")).unwrap();
        let content = "templateUrl : fn('my-customer.html')";
        let (s, e) = matcher.find(content, 0, content.len()).unwrap();
        assert_eq!(&content[s..e], "my-customer.html");

        assert!(matcher.find("templateUrl : 'bare.html'", 0, 25).is_none());
    }

    #[test]
    fn wrap_pattern_without_placeholder_is_rejected() {
        assert!(matches!(
            TemplateUrlMatcher::new(Some("fn('foo')")),
            Err(MillError::Config(_))
        ));
    }
}
