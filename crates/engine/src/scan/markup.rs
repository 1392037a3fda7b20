//! Markup inspection, driven by a pluggable handler-based parser.
//!
//! The engine does not tokenize markup itself: an external parser walks
//! the document and calls back with located elements, each tagged with
//! 1-based line/column spans. A small hand-written tag/attribute
//! scanner is provided as the default parser.

use std::sync::Arc;

use tracing::debug;

use assetmill_core::Result;

use crate::scan::inspector::{InspectContext, Inspector, MatchEvent, resolve_reference};

/// 1-based position span of an element in a markup document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkupSpan {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// Callback interface an external markup parser reports into.
#[allow(unused_variables)]
pub trait MarkupHandler {
    fn on_comment(&mut self, span: MarkupSpan, text: &str) {}

    /// A script block with its attributes and inline body, if any.
    fn on_script(&mut self, span: MarkupSpan, attributes: &[(String, String)], inline: Option<&str>) {}

    /// A style block with its attributes and inline body, if any.
    fn on_style(&mut self, span: MarkupSpan, attributes: &[(String, String)], inline: Option<&str>) {}

    /// A link-like element (stylesheet references and the like).
    fn on_link(&mut self, span: MarkupSpan, attributes: &[(String, String)]) {}

    fn on_image(&mut self, span: MarkupSpan, attributes: &[(String, String)]) {}

    /// An import-like directive (`<link rel="import">`).
    fn on_import(&mut self, span: MarkupSpan, attributes: &[(String, String)]) {}
}

/// External parser walking a document and feeding a handler.
pub trait MarkupParser: Send + Sync {
    fn parse(&self, content: &str, handler: &mut dyn MarkupHandler) -> Result<()>;
}

/// Hand-written tag/attribute scanner, the default markup parser.
/// Understands `<!-- -->` comments, quoted and bare attribute values
/// and inline script/style bodies; anything fancier belongs to a real
/// parser behind the `MarkupParser` trait.
pub struct TagScanner;

impl MarkupParser for TagScanner {
    fn parse(&self, content: &str, handler: &mut dyn MarkupHandler) -> Result<()> {
        let bytes = content.as_bytes();
        let lines = LineTable::new(content);
        let mut i = 0;

        while let Some(open) = find_byte(bytes, b'<', i) {
            if bytes[open..].starts_with(b"<!--") {
                let close = content[open + 4..]
                    .find("-->")
                    .map(|idx| open + 4 + idx + 3)
                    .unwrap_or(bytes.len());
                handler.on_comment(lines.span(open, close), &content[open..close]);
                i = close;
                continue;
            }

            let Some(end) = find_byte(bytes, b'>', open) else {
                break;
            };
            let tag_end = end + 1;
            let inner = &content[open + 1..end];
            let (name, rest) = split_tag_name(inner);
            let attributes = parse_attributes(rest);

            match name.to_ascii_lowercase().as_str() {
                "script" | "style" => {
                    let closing = format!("</{}>", name.to_ascii_lowercase());
                    let body_end = content[tag_end..]
                        .to_ascii_lowercase()
                        .find(&closing)
                        .map(|idx| tag_end + idx);

                    let (inline, element_end) = match body_end {
                        Some(body_end) => {
                            let body = &content[tag_end..body_end];
                            let trimmed = body.trim();
                            (
                                (!trimmed.is_empty()).then_some(body),
                                body_end + closing.len(),
                            )
                        }
                        None => (None, tag_end),
                    };

                    let span = lines.span(open, element_end);
                    if name.eq_ignore_ascii_case("script") {
                        handler.on_script(span, &attributes, inline);
                    } else {
                        handler.on_style(span, &attributes, inline);
                    }
                    i = element_end;
                }
                "img" => {
                    handler.on_image(lines.span(open, tag_end), &attributes);
                    i = tag_end;
                }
                "link" => {
                    let span = lines.span(open, tag_end);
                    if attribute(&attributes, "rel").is_some_and(|rel| rel.eq_ignore_ascii_case("import")) {
                        handler.on_import(span, &attributes);
                    } else {
                        handler.on_link(span, &attributes);
                    }
                    i = tag_end;
                }
                _ => i = tag_end,
            }
        }

        Ok(())
    }
}

/// Inspector rewriting `src`/`href` references located by the parser.
pub struct MarkupInspector {
    parser: Arc<dyn MarkupParser>,
}

impl MarkupInspector {
    pub fn new(parser: Arc<dyn MarkupParser>) -> MarkupInspector {
        MarkupInspector { parser }
    }
}

impl Inspector for MarkupInspector {
    fn new_inspection(&mut self) {}

    fn inspect(
        &mut self,
        content: &str,
        ctx: &InspectContext<'_>,
        sink: &mut dyn FnMut(MatchEvent),
    ) -> Result<()> {
        let mut collector = ReferenceCollector {
            lines: LineTable::new(content),
            content,
            found: Vec::new(),
        };
        self.parser.parse(content, &mut collector)?;

        for (span, path) in collector.found {
            if path.starts_with("http://") || path.starts_with("https://") || path.starts_with('/') {
                continue;
            }

            debug!(path = %path, "markup reference located");
            let resolved = resolve_reference(ctx, &path)?;
            sink(MatchEvent {
                offset: span.0,
                length: span.1 - span.0,
                replacement: resolved.url,
                extracted: resolved.extracted,
            });
        }

        Ok(())
    }
}

/// Handler collecting the byte spans of reference-bearing attribute
/// values inside elements reported by the parser.
struct ReferenceCollector<'a> {
    lines: LineTable,
    content: &'a str,
    found: Vec<((usize, usize), String)>,
}

impl ReferenceCollector<'_> {
    fn collect(&mut self, span: MarkupSpan, attributes: &[(String, String)], attr: &str) {
        let Some(value) = attribute(attributes, attr) else {
            return;
        };
        if value.is_empty() {
            return;
        }

        let (start, end) = self.lines.bytes(span);
        if let Some(idx) = self.content[start..end.min(self.content.len())].find(value) {
            let at = start + idx;
            self.found.push(((at, at + value.len()), value.to_string()));
        }
    }
}

impl MarkupHandler for ReferenceCollector<'_> {
    fn on_script(&mut self, span: MarkupSpan, attributes: &[(String, String)], _inline: Option<&str>) {
        self.collect(span, attributes, "src");
    }

    fn on_link(&mut self, span: MarkupSpan, attributes: &[(String, String)]) {
        self.collect(span, attributes, "href");
    }

    fn on_image(&mut self, span: MarkupSpan, attributes: &[(String, String)]) {
        self.collect(span, attributes, "src");
    }

    fn on_import(&mut self, span: MarkupSpan, attributes: &[(String, String)]) {
        self.collect(span, attributes, "href");
    }
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn find_byte(bytes: &[u8], needle: u8, from: usize) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|idx| from + idx)
}

fn split_tag_name(inner: &str) -> (&str, &str) {
    let inner = inner.trim_start_matches('/');
    match inner.find(|c: char| c.is_whitespace()) {
        Some(idx) => (&inner[..idx], &inner[idx..]),
        None => (inner.trim_end_matches('/'), ""),
    }
}

fn parse_attributes(rest: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let bytes = rest.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() && bytes[i] != b'/' {
            i += 1;
        }
        if i == name_start {
            break;
        }
        let name = rest[name_start..i].to_string();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let value = if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                let value_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                let value = rest[value_start..i].to_string();
                i = (i + 1).min(bytes.len());
                value
            } else {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'/' {
                    i += 1;
                }
                rest[value_start..i].to_string()
            };
            out.push((name, value));
        } else {
            out.push((name, String::new()));
        }
    }

    out
}

/// Byte offsets of line starts, converting between 1-based line/column
/// spans and byte ranges.
struct LineTable {
    starts: Vec<usize>,
    len: usize,
}

impl LineTable {
    fn new(content: &str) -> LineTable {
        let mut starts = vec![0];
        for (idx, byte) in content.bytes().enumerate() {
            if byte == b'\n' {
                starts.push(idx + 1);
            }
        }
        LineTable {
            starts,
            len: content.len(),
        }
    }

    fn span(&self, start: usize, end: usize) -> MarkupSpan {
        let (start_line, start_col) = self.position(start);
        let (end_line, end_col) = self.position(end.saturating_sub(1));
        MarkupSpan {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    fn position(&self, offset: usize) -> (u32, u32) {
        let line = self.starts.partition_point(|&s| s <= offset);
        let col = offset - self.starts[line - 1] + 1;
        (line as u32, col as u32)
    }

    /// Byte range covered by a 1-based span, end exclusive.
    fn bytes(&self, span: MarkupSpan) -> (usize, usize) {
        let start = self.starts[(span.start_line as usize - 1).min(self.starts.len() - 1)]
            + span.start_col as usize
            - 1;
        let end = self.starts[(span.end_line as usize - 1).min(self.starts.len() - 1)]
            + span.end_col as usize;
        (start.min(self.len), end.min(self.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        scripts: Vec<(Option<String>, Vec<(String, String)>)>,
        images: Vec<Vec<(String, String)>>,
        links: usize,
        imports: usize,
        comments: Vec<String>,
    }

    impl MarkupHandler for Recording {
        fn on_comment(&mut self, _span: MarkupSpan, text: &str) {
            self.comments.push(text.to_string());
        }

        fn on_script(&mut self, _span: MarkupSpan, attributes: &[(String, String)], inline: Option<&str>) {
            self.scripts
                .push((inline.map(str::to_string), attributes.to_vec()));
        }

        fn on_link(&mut self, _span: MarkupSpan, _attributes: &[(String, String)]) {
            self.links += 1;
        }

        fn on_image(&mut self, _span: MarkupSpan, attributes: &[(String, String)]) {
            self.images.push(attributes.to_vec());
        }

        fn on_import(&mut self, _span: MarkupSpan, _attributes: &[(String, String)]) {
            self.imports += 1;
        }
    }

    #[test]
    fn tag_scanner_reports_elements() {
        let content = concat!(
            "<!-- header -->\n",
            "<script src=\"app.js\"></script>\n",
            "<script>inline();</script>\n",
            "<img src='logo.png'>\n",
            "<link rel=\"stylesheet\" href=\"a.css\">\n",
            "<link rel=\"import\" href=\"part.html\">\n",
        );

        let mut handler = Recording::default();
        TagScanner.parse(content, &mut handler).unwrap();

        assert_eq!(handler.comments, vec!["<!-- header -->".to_string()]);
        assert_eq!(handler.scripts.len(), 2);
        assert_eq!(
            handler.scripts[0].1,
            vec![("src".to_string(), "app.js".to_string())]
        );
        assert_eq!(handler.scripts[1].0.as_deref(), Some("inline();"));
        assert_eq!(handler.images.len(), 1);
        assert_eq!(handler.links, 1);
        assert_eq!(handler.imports, 1);
    }

    #[test]
    fn spans_are_one_based() {
        let content = "x\n<img src=\"a.png\">";
        struct SpanCheck(Option<MarkupSpan>);
        impl MarkupHandler for SpanCheck {
            fn on_image(&mut self, span: MarkupSpan, _attributes: &[(String, String)]) {
                self.0 = Some(span);
            }
        }

        let mut handler = SpanCheck(None);
        TagScanner.parse(content, &mut handler).unwrap();
        let span = handler.0.unwrap();
        assert_eq!((span.start_line, span.start_col), (2, 1));
    }
}
