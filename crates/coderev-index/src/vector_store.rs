//! Vector backend abstraction.
//!
//! A backend stores one row per code element: the scalar fields of
//! [`VectorRecord`] plus its embedding. Collections are created with cosine
//! distance. The trait is object safe so backends can be chosen at runtime.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("insert error: {0}")]
    Insert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("count error: {0}")]
    Count(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Scalar fields stored with each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub file_path: String,
    pub language: String,
    pub element_type: String,
    pub element_name: String,
    pub content: String,
}

impl VectorRecord {
    pub(crate) fn to_payload(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("file_path".to_string(), self.file_path.clone().into()),
            ("language".to_string(), self.language.clone().into()),
            ("element_type".to_string(), self.element_type.clone().into()),
            ("element_name".to_string(), self.element_name.clone().into()),
            ("content".to_string(), self.content.clone().into()),
        ])
    }

    pub(crate) fn from_payload<'a, F>(get: F) -> Result<Self, VectorStoreError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let field = |name: &str| {
            get(name)
                .map(str::to_string)
                .ok_or_else(|| VectorStoreError::Serialization(format!("missing payload field {name}")))
        };
        Ok(Self {
            file_path: field("file_path")?,
            language: field("language")?,
            element_type: field("element_type")?,
            element_name: field("element_name")?,
            content: field("content")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub record: VectorRecord,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub score: f32,
    pub record: VectorRecord,
}

/// Payload fields that get a keyword index.
pub const INDEXED_FIELDS: [&str; 3] = ["file_path", "language", "element_type"];

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorBackend: Send + Sync {
    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn create_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Create the similarity and payload indexes for a fresh collection.
    fn create_index(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn drop_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Delete every row whose `file_path` equals `file_path`.
    fn delete_by_file(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn insert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Top `limit` rows by cosine similarity, best first.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>>;

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>>;

    /// Rows grouped by `file_path` with their counts.
    fn count_by_file(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<HashMap<String, u64>, VectorStoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VectorRecord {
        VectorRecord {
            file_path: "a.py".into(),
            language: "python".into(),
            element_type: "function".into(),
            element_name: "run".into(),
            content: "def run(): pass".into(),
        }
    }

    #[test]
    fn payload_roundtrip() {
        let payload = record().to_payload();
        let back = VectorRecord::from_payload(|k| payload.get(k).and_then(|v| v.as_str())).unwrap();
        assert_eq!(back, record());
    }

    #[test]
    fn missing_payload_field_is_error() {
        let mut payload = record().to_payload();
        payload.remove("content");
        let err = VectorRecord::from_payload(|k| payload.get(k).and_then(|v| v.as_str()))
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Serialization(_)));
    }
}
