//! Application of recorded content transforms.
//!
//! The comment-aware transforms reuse the scanning engine rather than
//! re-deriving the comment/literal state machine.

use assetmill_core::nut::TransformerSpec;
use assetmill_core::util::version_query;

use crate::scan::{Boundary, MatchCondition, ScriptScanner};

/// Removes `//` and `/* */` comments, never touching string literals.
pub fn strip_comments(content: &str) -> String {
    let mut removals: Vec<(usize, usize)> = Vec::new();

    // Block comments first, then line comments: each pass skips regions
    // owned by the other, so the collected spans never overlap.
    for condition in [
        MatchCondition::MultiLineComment,
        MatchCondition::SingleLineComment,
    ] {
        let mut scanner = ScriptScanner::new(condition);
        scanner.new_inspection();

        let mut data = content.as_bytes().to_vec();
        let end = data.len();
        let mut start = 0;

        while let Some(range) = scanner.next_range(&mut data, start, end) {
            if range.boundary == Boundary::Continue {
                start = range.start;
                continue;
            }
            removals.push((range.start, range.end));
            start = range.end.max(start + 1);
        }
    }

    removals.sort();

    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for (from, to) in removals {
        if from >= cursor {
            out.push_str(&content[cursor..from]);
            cursor = to;
        }
    }
    out.push_str(&content[cursor..]);
    out
}

/// Collapses runs of blank lines into a single newline.
pub fn collapse_blank_lines(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut blank_run = 0usize;

    for line in content.split_inclusive('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            // Keep one newline for the whole run.
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line);
        }
    }

    out
}

/// Re-applies recorded transforms against live content, the dynamic
/// cache entry materialization path.
pub fn apply_transformers(specs: &[TransformerSpec], content: &str) -> String {
    let mut current = content.to_string();

    for spec in specs {
        current = match spec {
            TransformerSpec::StripComments => strip_comments(&current),
            TransformerSpec::CollapseBlankLines => collapse_blank_lines(&current),
            TransformerSpec::Replace { needle, replacement } => {
                current.replace(needle.as_str(), replacement)
            }
            TransformerSpec::VersionQuery { path, version } => {
                current.replace(path.as_str(), &version_query(path, *version))
            }
        };
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_both_comment_kinds() {
        let content = "var a = 1; // one\n/* two\n   lines */var b = 2;\n";
        let out = strip_comments(content);
        assert_eq!(out, "var a = 1; \nvar b = 2;\n");
    }

    #[test]
    fn literals_survive_comment_stripping() {
        let content = "var s = \"// keep\"; /* gone */\n";
        assert_eq!(strip_comments(content), "var s = \"// keep\"; \n");
    }

    #[test]
    fn clean_input_is_untouched() {
        let content = "var a = 1;\nvar b = 2;\n";
        assert_eq!(strip_comments(content), content);
        assert_eq!(collapse_blank_lines(content), content);
    }

    #[test]
    fn blank_line_runs_collapse() {
        let content = "a\n\n\n\nb\n";
        assert_eq!(collapse_blank_lines(content), "a\n\nb\n");
    }

    #[test]
    fn transformers_apply_in_order() {
        let specs = vec![
            TransformerSpec::Replace {
                needle: "X".to_string(),
                replacement: "Y".to_string(),
            },
            TransformerSpec::VersionQuery {
                path: "foo.png".to_string(),
                version: 42,
            },
        ];
        let out = apply_transformers(&specs, "X url(foo.png)");
        assert_eq!(out, "Y url(foo.png?versionNumber=42)");
    }
}
