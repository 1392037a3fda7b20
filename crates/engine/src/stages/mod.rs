//! Concrete pipeline stages.

mod aggregate;
mod compress;
mod inspect;
mod minify;

pub use aggregate::TextAggregatorStage;
pub use compress::{Codec, CompressStage};
pub use inspect::TextInspectorStage;
pub use minify::MinifyStage;
