use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MillError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("cache entry decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("unable to resolve '{path}' referenced by '{referencer}'")]
    Resolution { path: String, referencer: String },
    #[error("stage '{kind}' failed for workflow '{workflow}': {detail}")]
    Stage {
        kind: &'static str,
        workflow: String,
        detail: String,
    },
    #[error("{0}")]
    Async(Arc<MillError>),
    #[error("computation was cancelled before completion")]
    Cancelled,
    #[error("inconsistent state: {0}")]
    Inconsistency(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no content type matches '{0}'")]
    UnsupportedType(String),
    #[error("content of '{0}' is not valid UTF-8")]
    NotText(String),
}

impl MillError {
    /// Wraps a failure that happened on another task so every waiter
    /// observes the original error instead of a generic wait error.
    pub fn shared(self) -> Arc<MillError> {
        match self {
            MillError::Async(inner) => inner,
            other => Arc::new(other),
        }
    }
}

impl From<Arc<MillError>> for MillError {
    fn from(err: Arc<MillError>) -> Self {
        MillError::Async(err)
    }
}

pub type Result<T> = std::result::Result<T, MillError>;
