//! Incremental code indexing and review-context retrieval.
//!
//! Source files are parsed with tree-sitter into structural elements, tracked
//! by content hash in per-file JSON records, embedded, and stored one
//! collection per repository. A review request embeds the patch, pulls the
//! most similar elements plus the target file's dependencies, and returns them
//! as a [`retriever::ReviewContext`].

pub mod analyzer;
pub mod checkout;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod in_memory_store;
pub mod index_manager;
pub mod indexer;
pub mod languages;
pub mod layout;
pub mod pool;
pub mod qdrant;
pub mod retriever;
pub mod store;
pub mod structure;
pub mod summary;
pub mod vector_store;
pub mod watcher;

pub use engine::Engine;
pub use error::{IndexError, Result};
pub use indexer::{CodeAnalyzer, IndexerConfig};
pub use retriever::{ReviewContext, can_use};
