//! Pipeline engine: stages, chains, the result cache and the scanning
//! engine that locates asset references inside text content.

pub mod cache;
pub mod chain;
pub mod exec;
pub mod request;
pub mod scan;
pub mod stages;

pub use assetmill_core::{MillError, Result};
