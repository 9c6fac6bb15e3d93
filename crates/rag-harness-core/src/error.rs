//! Error taxonomy shared by the ingestion and query pipelines.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    /// Missing or malformed request fields. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// Exact, fully verified duplicate. Reported as a conflict.
    #[error("Duplicate content: {0}")]
    Duplicate(String),

    /// Metadata exists but the index holds no vectors for it.
    #[error("Incomplete processing: {0}")]
    IncompleteProcessing(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Vector dimension mismatch: collection has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Metadata store error: {0}")]
    Metadata(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
