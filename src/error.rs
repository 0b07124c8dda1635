use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the chunking engine. Every variant is fatal for the
/// document being processed; no partial chunk sequence is ever returned.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("document not found: {}", path.display())]
    DocumentNotFound { path: PathBuf },

    #[error("failed to extract {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("chunking failed: {reason}")]
    Chunking { reason: String },

    #[error("invalid chunker configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl ChunkError {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn chunking(reason: impl Into<String>) -> Self {
        Self::Chunking {
            reason: reason.into(),
        }
    }
}

impl From<regex::Error> for ChunkError {
    fn from(err: regex::Error) -> Self {
        ChunkError::Chunking {
            reason: format!("pattern failed to compile: {err}"),
        }
    }
}

/// Failures at the vector store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("metadata key '{key}' has unsupported value type {kind}")]
    UnsupportedMetadata { key: String, kind: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("embedding failed: {reason}")]
    Embedding { reason: String },
}

impl StoreError {
    /// Malformed input fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::UnsupportedMetadata { .. })
    }
}
