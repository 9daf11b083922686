//! Repository-scoped access to the vector backend.
//!
//! [`StoreClient`] is created once per process and shared. It remembers
//! which collections are ready so each is checked or created only once, with
//! a lock per collection so preparing one repository never waits on another.
//! [`CodeStore`] binds the client to one repository's collection.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::analyzer::CodeElement;
use crate::error::Result;
use crate::languages::Lang;
use crate::vector_store::{ScoredRecord, VectorBackend, VectorPoint, VectorRecord};

pub struct StoreClient {
    backend: Arc<dyn VectorBackend>,
    ready: Mutex<HashSet<String>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient").finish_non_exhaustive()
    }
}

impl StoreClient {
    #[must_use]
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self {
            backend,
            ready: Mutex::new(HashSet::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    fn collection_lock(&self, collection: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(collection.to_string()).or_default())
    }

    fn is_ready(&self, collection: &str) -> bool {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(collection)
    }

    fn set_ready(&self, collection: &str, ready: bool) {
        let mut set = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        if ready {
            set.insert(collection.to_string());
        } else {
            set.remove(collection);
        }
    }

    /// Create the collection with its indexes unless it already exists.
    /// If index creation fails the new collection is dropped again.
    ///
    /// # Errors
    ///
    /// Returns the backend error from the failed step.
    pub async fn ensure_collection(&self, collection: &str, vector_size: u64) -> Result<()> {
        if self.is_ready(collection) {
            return Ok(());
        }
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;
        if self.is_ready(collection) {
            return Ok(());
        }

        if !self.backend.collection_exists(collection).await? {
            tracing::info!(collection, vector_size, "creating vector collection");
            self.backend.create_collection(collection, vector_size).await?;
            if let Err(e) = self.backend.create_index(collection).await {
                tracing::error!(collection, "index creation failed, dropping collection: {e}");
                if let Err(drop_err) = self.backend.drop_collection(collection).await {
                    tracing::warn!(collection, "rollback drop failed: {drop_err}");
                }
                return Err(e.into());
            }
        }

        self.set_ready(collection, true);
        Ok(())
    }

    /// Whether the collection exists, consulting the ready set first.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the existence check fails.
    pub async fn collection_exists(&self, collection: &str) -> Result<bool> {
        if self.is_ready(collection) {
            return Ok(true);
        }
        Ok(self.backend.collection_exists(collection).await?)
    }

    /// # Errors
    ///
    /// Returns the backend error if the drop fails.
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;
        self.set_ready(collection, false);
        self.backend.drop_collection(collection).await?;
        Ok(())
    }
}

/// An element paired with its embedding, ready to be stored.
#[derive(Debug, Clone)]
pub struct EmbeddedElement {
    pub element: CodeElement,
    pub vector: Vec<f32>,
}

/// Elements that get a vector: excluded kinds dropped, and only the first
/// element per `(kind, name)` kept.
#[must_use]
pub fn vectorizable_elements(elements: &[CodeElement]) -> Vec<&CodeElement> {
    let mut seen = BTreeSet::new();
    elements
        .iter()
        .filter(|e| e.kind.is_vectorized())
        .filter(|e| seen.insert((e.kind, e.name.as_str())))
        .collect()
}

/// The vector collection of one repository.
#[derive(Debug, Clone)]
pub struct CodeStore {
    client: Arc<StoreClient>,
    collection: String,
}

impl CodeStore {
    #[must_use]
    pub fn new(client: Arc<StoreClient>, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// # Errors
    ///
    /// See [`StoreClient::ensure_collection`].
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<()> {
        self.client
            .ensure_collection(&self.collection, vector_size)
            .await
    }

    /// # Errors
    ///
    /// Returns the backend error if the existence check fails.
    pub async fn exists(&self) -> Result<bool> {
        self.client.collection_exists(&self.collection).await
    }

    /// Delete all rows for `file_path`, then insert one row per element.
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns the backend error from the delete or insert.
    pub async fn replace_file_vectors(
        &self,
        file_path: &str,
        language: Lang,
        elements: Vec<EmbeddedElement>,
    ) -> Result<usize> {
        let backend = self.client.backend();
        backend.delete_by_file(&self.collection, file_path).await?;

        let points: Vec<VectorPoint> = elements
            .into_iter()
            .map(|e| VectorPoint {
                record: VectorRecord {
                    file_path: file_path.to_string(),
                    language: language.id().to_string(),
                    element_type: e.element.kind.as_str().to_string(),
                    element_name: e.element.name,
                    content: e.element.content,
                },
                vector: e.vector,
            })
            .collect();
        let written = points.len();
        if written > 0 {
            backend.insert(&self.collection, points).await?;
        }
        Ok(written)
    }

    /// # Errors
    ///
    /// Returns the backend error if the delete fails.
    pub async fn delete_file(&self, file_path: &str) -> Result<()> {
        self.client
            .backend()
            .delete_by_file(&self.collection, file_path)
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the backend error if the search fails.
    pub async fn search(&self, vector: Vec<f32>, k: u64) -> Result<Vec<ScoredRecord>> {
        Ok(self
            .client
            .backend()
            .search(&self.collection, vector, k)
            .await?)
    }

    /// # Errors
    ///
    /// Returns the backend error if the count fails.
    pub async fn count(&self) -> Result<u64> {
        Ok(self.client.backend().count(&self.collection).await?)
    }

    /// # Errors
    ///
    /// Returns the backend error if the scan fails.
    pub async fn count_by_file(&self) -> Result<HashMap<String, u64>> {
        Ok(self.client.backend().count_by_file(&self.collection).await?)
    }
}
