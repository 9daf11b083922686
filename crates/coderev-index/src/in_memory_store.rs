use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::vector_store::{
    BoxFuture, ScoredRecord, VectorBackend, VectorPoint, VectorRecord, VectorStoreError,
};

struct StoredPoint {
    vector: Vec<f32>,
    record: VectorRecord,
}

struct InMemoryCollection {
    vector_size: usize,
    indexed: bool,
    next_id: u64,
    points: HashMap<u64, StoredPoint>,
}

/// Process-local backend for tests and `--vector-store memory` runs.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, InMemoryCollection>>, VectorStoreError> {
        self.collections
            .read()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, InMemoryCollection>>, VectorStoreError> {
        self.collections
            .write()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))
    }

    /// Whether `create_index` has run for the collection.
    #[must_use]
    pub fn is_indexed(&self, collection: &str) -> bool {
        self.read()
            .ok()
            .and_then(|cols| cols.get(collection).map(|c| c.indexed))
            .unwrap_or(false)
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorBackend for InMemoryVectorStore {
    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { Ok(self.read()?.contains_key(&collection)) })
    }

    fn create_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let vector_size = usize::try_from(vector_size)
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let mut cols = self.write()?;
            if cols.contains_key(&collection) {
                return Err(VectorStoreError::Collection(format!(
                    "collection {collection} already exists"
                )));
            }
            cols.insert(
                collection,
                InMemoryCollection {
                    vector_size,
                    indexed: false,
                    next_id: 0,
                    points: HashMap::new(),
                },
            );
            Ok(())
        })
    }

    fn create_index(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.write()?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Index(format!("collection {collection} not found"))
            })?;
            col.indexed = true;
            Ok(())
        })
    }

    fn drop_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.write()?.remove(&collection);
            Ok(())
        })
    }

    fn delete_by_file(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let mut cols = self.write()?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Delete(format!("collection {collection} not found"))
            })?;
            col.points.retain(|_, p| p.record.file_path != file_path);
            Ok(())
        })
    }

    fn insert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.write()?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Insert(format!("collection {collection} not found"))
            })?;
            if let Some(bad) = points.iter().find(|p| p.vector.len() != col.vector_size) {
                return Err(VectorStoreError::Insert(format!(
                    "vector size {} does not match collection size {}",
                    bad.vector.len(),
                    col.vector_size
                )));
            }
            for p in points {
                let id = col.next_id;
                col.next_id += 1;
                col.points.insert(
                    id,
                    StoredPoint {
                        vector: p.vector,
                        record: p.record,
                    },
                );
            }
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.read()?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Search(format!("collection {collection} not found"))
            })?;

            let mut scored: Vec<(u64, ScoredRecord)> = col
                .points
                .iter()
                .map(|(id, sp)| {
                    (
                        *id,
                        ScoredRecord {
                            score: cosine_similarity(&vector, &sp.vector),
                            record: sp.record.clone(),
                        },
                    )
                })
                .collect();

            scored.sort_by(|(ia, a), (ib, b)| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(ia.cmp(ib))
            });
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            Ok(scored.into_iter().take(limit).map(|(_, s)| s).collect())
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.read()?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Count(format!("collection {collection} not found"))
            })?;
            Ok(col.points.len() as u64)
        })
    }

    fn count_by_file(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<HashMap<String, u64>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.read()?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Count(format!("collection {collection} not found"))
            })?;
            let mut counts = HashMap::new();
            for p in col.points.values() {
                *counts.entry(p.record.file_path.clone()).or_insert(0) += 1;
            }
            Ok(counts)
        })
    }
}
