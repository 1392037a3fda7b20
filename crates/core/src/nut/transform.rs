use serde::{Deserialize, Serialize};

/// A serializable, self-contained content transform.
///
/// Dynamic units cannot be cached as bytes, so the transforms applied
/// to them are recorded as data and re-applied against the live content
/// at lookup time. Only transforms that need no pipeline context are
/// representable here; application lives next to the scanning engine,
/// which owns the comment state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformerSpec {
    /// Remove `//` and `/* */` comments outside string literals.
    StripComments,
    /// Collapse runs of blank lines into a single newline.
    CollapseBlankLines,
    /// Literal search/replace, first-to-last occurrence order.
    Replace { needle: String, replacement: String },
    /// Stamp an unresolvable reference with a version query parameter.
    VersionQuery { path: String, version: u64 },
}
