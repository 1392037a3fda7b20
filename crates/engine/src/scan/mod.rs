//! Character-level scanning engine.
//!
//! Locates reference-bearing spans in text content while tracking
//! nested lexical state (comments, string literals) across arbitrarily
//! large inputs. The scanner alternates between range finding (which
//! sub-ranges are eligible for matching under the active condition) and
//! pattern matching within an eligible range. Entering a comment or
//! literal is reported as a zero-length `Continue` range so the caller
//! loop advances without recursion.

mod css;
mod inspector;
mod markup;
mod sourcemap;
mod template;
mod transform;

pub use css::CssUrlMatcher;
pub use inspector::{
    InspectContext, Inspector, MatchEvent, Resolved, ScopedInspector, SpanMatcher,
    apply_events, resolve_reference,
};
pub use markup::{MarkupHandler, MarkupInspector, MarkupParser, MarkupSpan, TagScanner};
pub use sourcemap::SourceMapMatcher;
pub use template::TemplateUrlMatcher;
pub use transform::{apply_transformers, collapse_blank_lines, strip_comments};

/// Restricts which sub-ranges of a buffer are eligible for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCondition {
    /// Match anywhere.
    All,
    /// Match outside comments; string literals stay eligible.
    NoComment,
    /// Match inside `//` comments only.
    SingleLineComment,
    /// Match inside `/* */` comments only.
    MultiLineComment,
}

/// What delimited an eligible range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    StartSingleLineComment,
    StartMultiLineComment,
    StartLiteral,
    EndSingleLineComment,
    EndMultiLineComment,
    EndLiteral,
    /// End of buffer reached.
    Eof,
    /// Not a range to match: the caller loop must resume at `start`.
    /// Keeps stack depth constant on large inputs.
    Continue,
}

/// A half-open `[start, end)` byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub boundary: Boundary,
    pub start: usize,
    pub end: usize,
}

impl ScanRange {
    fn cont(resume: usize, end: usize) -> ScanRange {
        ScanRange {
            boundary: Boundary::Continue,
            start: resume,
            end,
        }
    }
}

/// Lexical state carried across successive scans of the same content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanState {
    in_single_line_comment: bool,
    in_multi_line_comment: bool,
    quote: Option<u8>,
}

/// Stateful scanner parameterized by a match condition.
pub struct ScriptScanner {
    condition: MatchCondition,
    state: ScanState,
}

impl ScriptScanner {
    pub fn new(condition: MatchCondition) -> ScriptScanner {
        ScriptScanner {
            condition,
            state: ScanState::default(),
        }
    }

    /// Resets the lexical state. Must be called once per logical file
    /// before any scan of that file's content.
    pub fn new_inspection(&mut self) {
        self.state = ScanState::default();
    }

    /// Finds the next eligible range in `data[start..end)`.
    ///
    /// In `NoComment` mode comment spans inside the returned range are
    /// blanked with spaces in `data`, so matching over the buffer never
    /// sees comment text; original content must be kept separately for
    /// replacement building.
    pub fn next_range(&mut self, data: &mut [u8], start: usize, end: usize) -> Option<ScanRange> {
        if start >= end {
            return None;
        }

        match self.condition {
            MatchCondition::All => Some(ScanRange {
                boundary: Boundary::Eof,
                start,
                end,
            }),
            MatchCondition::NoComment => self.no_comment_range(data, start, end),
            MatchCondition::SingleLineComment => self.single_line_comment_case(data, start, end),
            MatchCondition::MultiLineComment => self.multi_line_comment_case(data, start, end),
        }
    }

    /// Range finding when only `//` comment bodies are eligible.
    fn single_line_comment_case(&mut self, data: &[u8], start: usize, end: usize) -> Option<ScanRange> {
        if self.state.quote.is_some() {
            // Skip the literal: first character is the opening quote.
            let close = self.find_end_of_literal(data, start + 1, end)?;
            self.state.quote = None;
            Some(ScanRange::cont(close + 1, end))
        } else if self.state.in_multi_line_comment {
            let close = find_end_of_multi_line_comment(data, start + 2, end)?;
            self.state.in_multi_line_comment = false;
            Some(ScanRange::cont(close + 1, end))
        } else if self.state.in_single_line_comment {
            match find_end_of_single_line_comment(data, start, end) {
                Some(newline) => {
                    self.state.in_single_line_comment = false;
                    Some(ScanRange {
                        boundary: Boundary::EndSingleLineComment,
                        start,
                        end: newline,
                    })
                }
                // The comment runs to the end of the buffer.
                None => Some(ScanRange {
                    boundary: Boundary::Eof,
                    start,
                    end,
                }),
            }
        } else {
            let decision = self.decide(data, start, end)?;
            Some(ScanRange::cont(decision.1, end))
        }
    }

    /// Range finding when only `/* */` comment bodies are eligible.
    fn multi_line_comment_case(&mut self, data: &[u8], start: usize, end: usize) -> Option<ScanRange> {
        if self.state.quote.is_some() {
            let close = self.find_end_of_literal(data, start + 1, end)?;
            self.state.quote = None;
            Some(ScanRange::cont(close + 1, end))
        } else if self.state.in_multi_line_comment {
            match find_end_of_multi_line_comment(data, start + 2, end) {
                Some(close) => {
                    self.state.in_multi_line_comment = false;
                    Some(ScanRange {
                        boundary: Boundary::EndMultiLineComment,
                        start,
                        end: close + 1,
                    })
                }
                None => Some(ScanRange {
                    boundary: Boundary::Eof,
                    start,
                    end,
                }),
            }
        } else if self.state.in_single_line_comment {
            let newline = find_end_of_single_line_comment(data, start, end)?;
            self.state.in_single_line_comment = false;
            Some(ScanRange::cont(newline + 1, end))
        } else {
            let decision = self.decide(data, start, end)?;
            Some(ScanRange::cont(decision.1, end))
        }
    }

    /// Range finding for the `NoComment` mode: successive eligible
    /// chunks are merged into one range and the comment gaps between
    /// them blanked, so a single match may span comment boundaries.
    fn no_comment_range(&mut self, data: &mut [u8], start: usize, end: usize) -> Option<ScanRange> {
        let (first, mut resume) = self.no_comment_chunk(data, start, end)?;
        let mut merged = first;

        while merged.boundary != Boundary::Eof {
            match self.no_comment_chunk(data, resume, end) {
                Some((next, next_resume)) => {
                    blank(data, merged.end, next.start);
                    merged.end = next.end;
                    merged.boundary = next.boundary;
                    resume = next_resume;
                }
                // The rest of the buffer is an unclosed comment or
                // literal: the merged range ends here.
                None => break,
            }
        }

        Some(merged)
    }

    /// One eligible chunk under `NoComment` rules, plus the position
    /// where the search resumes. Comments in front of the chunk are
    /// skipped iteratively.
    fn no_comment_chunk(
        &mut self,
        data: &[u8],
        start: usize,
        end: usize,
    ) -> Option<(ScanRange, usize)> {
        let mut cursor = start;

        loop {
            if cursor >= end {
                return None;
            }

            if self.state.quote.is_some() {
                // The literal itself is eligible content in this mode.
                let close = self.find_end_of_literal(data, cursor + 1, end)?;
                self.state.quote = None;
                return Some((
                    ScanRange {
                        boundary: Boundary::EndLiteral,
                        start: cursor,
                        end: close + 1,
                    },
                    close + 1,
                ));
            } else if self.state.in_multi_line_comment {
                let close = find_end_of_multi_line_comment(data, cursor + 2, end)?;
                self.state.in_multi_line_comment = false;
                cursor = close + 1;
            } else if self.state.in_single_line_comment {
                let newline = find_end_of_single_line_comment(data, cursor, end)?;
                self.state.in_single_line_comment = false;
                cursor = newline;
            } else {
                return match self.decide(data, cursor, end) {
                    None => Some((
                        ScanRange {
                            boundary: Boundary::Eof,
                            start: cursor,
                            end,
                        },
                        end,
                    )),
                    Some((boundary, idx)) => Some((
                        ScanRange {
                            boundary,
                            start: cursor,
                            end: idx,
                        },
                        idx,
                    )),
                };
            }
        }
    }

    /// Decides which delimiter starts first and updates the state.
    /// When starts coincide the precedence is multi-line comment, then
    /// single-line comment, then string literal.
    fn decide(&mut self, data: &[u8], start: usize, end: usize) -> Option<(Boundary, usize)> {
        let single = find_start_of_single_line_comment(data, start, end);
        let multi = find_start_of_multi_line_comment(data, start, end);
        let literal = find_start_of_string_literal(data, start, end);

        let s = single.unwrap_or(usize::MAX);
        let m = multi.unwrap_or(usize::MAX);
        let l = literal.map(|(idx, _)| idx).unwrap_or(usize::MAX);

        if m == usize::MAX && s == usize::MAX && l == usize::MAX {
            return None;
        }

        if m <= s && m <= l {
            self.state.in_multi_line_comment = true;
            self.state.quote = None;
            Some((Boundary::StartMultiLineComment, m))
        } else if s < m && s <= l {
            self.state.in_single_line_comment = true;
            self.state.quote = None;
            Some((Boundary::StartSingleLineComment, s))
        } else {
            self.state.quote = literal.map(|(_, quote)| quote);
            Some((Boundary::StartLiteral, l))
        }
    }

    /// Finds the unescaped closing quote matching the current state.
    fn find_end_of_literal(&self, data: &[u8], start: usize, end: usize) -> Option<usize> {
        let quote = self.state.quote?;

        for i in start..end {
            if data[i] == quote && !is_escaped(data, start, i) {
                return Some(i);
            }
        }

        None
    }
}

/// Whether the character at `idx` is escaped by an odd number of
/// preceding backslashes.
fn is_escaped(data: &[u8], floor: usize, idx: usize) -> bool {
    let mut escaped = false;
    let mut i = idx;

    while i > floor && data[i - 1] == b'\\' {
        escaped = !escaped;
        i -= 1;
    }

    escaped
}

fn find_start_of_string_literal(data: &[u8], start: usize, end: usize) -> Option<(usize, u8)> {
    for i in start..end {
        let c = data[i];
        if (c == b'\'' || c == b'"') && !is_escaped(data, start, i) {
            return Some((i, c));
        }
    }
    None
}

fn find_start_of_single_line_comment(data: &[u8], start: usize, end: usize) -> Option<usize> {
    (start..end.saturating_sub(1)).find(|&i| data[i] == b'/' && data[i + 1] == b'/')
}

fn find_start_of_multi_line_comment(data: &[u8], start: usize, end: usize) -> Option<usize> {
    (start..end.saturating_sub(1)).find(|&i| data[i] == b'/' && data[i + 1] == b'*')
}

/// Index of the closing `/` of `*/`, never overlapping the opening
/// delimiter the caller skipped.
fn find_end_of_multi_line_comment(data: &[u8], start: usize, end: usize) -> Option<usize> {
    ((start + 1).max(1)..end).find(|&i| data[i] == b'/' && data[i - 1] == b'*')
}

fn find_end_of_single_line_comment(data: &[u8], start: usize, end: usize) -> Option<usize> {
    (start..end).find(|&i| data[i] == b'\n')
}

fn blank(data: &mut [u8], from: usize, to: usize) {
    for byte in &mut data[from..to] {
        *byte = b' ';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects eligible ranges for a condition over one buffer.
    fn ranges(condition: MatchCondition, content: &str) -> Vec<(Boundary, String)> {
        let mut scanner = ScriptScanner::new(condition);
        scanner.new_inspection();
        let mut data = content.as_bytes().to_vec();
        let end = data.len();
        let mut start = 0;
        let mut out = Vec::new();

        while let Some(range) = scanner.next_range(&mut data, start, end) {
            if range.boundary == Boundary::Continue {
                start = range.start;
                continue;
            }
            out.push((
                range.boundary,
                String::from_utf8_lossy(&data[range.start..range.end]).into_owned(),
            ));
            start = range.end.max(start + 1);
        }

        out
    }

    #[test]
    fn single_line_mode_ignores_literal_contents() {
        let out = ranges(
            MatchCondition::SingleLineComment,
            "a = \"// not a comment\"; // real comment\nrest",
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, "// real comment");
    }

    #[test]
    fn multi_line_mode_finds_block_comments_only() {
        let out = ranges(
            MatchCondition::MultiLineComment,
            "before /* block */ after // line",
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, Boundary::EndMultiLineComment);
        assert_eq!(out[0].1, "/* block */");
    }

    #[test]
    fn multi_line_wins_tie_against_literal_and_single() {
        // "/*" immediately followed by content that would otherwise
        // open a literal; the comment mode captures everything to "*/".
        let out = ranges(MatchCondition::MultiLineComment, "/* \"quoted\" // x */!");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, "/* \"quoted\" // x */");
    }

    #[test]
    fn no_comment_mode_blanks_comments_and_keeps_literals() {
        let out = ranges(
            MatchCondition::NoComment,
            "a /* gone */ b = '/*kept*/';\nc // tail\nd",
        );

        let merged: String = out.iter().map(|(_, text)| text.as_str()).collect();
        assert!(merged.contains("'/*kept*/'"));
        assert!(!merged.contains("gone"));
        assert!(merged.contains('d'));
    }

    #[test]
    fn unterminated_multi_line_comment_swallows_the_rest() {
        let out = ranges(MatchCondition::NoComment, "code /* never closed");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.trim_end(), "code");
    }

    #[test]
    fn escaped_quotes_do_not_close_literals() {
        let out = ranges(
            MatchCondition::SingleLineComment,
            "s = 'it\\'s // fine'; // yes\n",
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, "// yes");
    }

    #[test]
    fn state_carries_across_scans_of_same_content() {
        let content = "/* spans \n chunks */ tail // c\n";
        let mut scanner = ScriptScanner::new(MatchCondition::SingleLineComment);
        scanner.new_inspection();

        let mut data = content.as_bytes().to_vec();
        let split = 10; // inside the block comment

        // First chunk enters the block comment and finds nothing.
        let mut start = 0;
        while let Some(range) = scanner.next_range(&mut data, start, split) {
            assert_eq!(range.boundary, Boundary::Continue);
            start = range.start;
            if start >= split {
                break;
            }
        }

        // Second chunk of the same content closes it and reaches the
        // single-line comment.
        let mut found = Vec::new();
        let mut start = split;
        let end = data.len();
        while let Some(range) = scanner.next_range(&mut data, start, end) {
            if range.boundary == Boundary::Continue {
                start = range.start;
                continue;
            }
            found.push(String::from_utf8_lossy(&data[range.start..range.end]).into_owned());
            start = range.end.max(start + 1);
        }

        assert_eq!(found, vec!["// c".to_string()]);
    }
}
