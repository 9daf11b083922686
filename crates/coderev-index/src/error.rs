//! Error types for coderev-index.

use std::num::TryFromIntError;

use crate::vector_store::VectorStoreError;

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or index records.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector store backend error.
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    /// Embedding or chat provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] coderev_llm::LlmError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Source could not be parsed by the language grammar.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Unsupported or unrecognized language.
    #[error("unsupported language")]
    UnsupportedLanguage,

    /// Repository clone or pull failed.
    #[error("checkout failed: {0}")]
    Checkout(String),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// A blocking worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
