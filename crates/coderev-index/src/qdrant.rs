//! Qdrant vector backend.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, value::Kind,
};

use crate::vector_store::{
    BoxFuture, INDEXED_FIELDS, ScoredRecord, VectorBackend, VectorPoint, VectorRecord,
    VectorStoreError,
};

#[derive(Clone)]
pub struct QdrantBackend {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantBackend").finish_non_exhaustive()
    }
}

impl QdrantBackend {
    /// Build a client for `url`. No connection is made until the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be configured.
    pub fn new(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    fn file_filter(file_path: &str) -> Filter {
        Filter::must([Condition::matches("file_path", file_path.to_string())])
    }
}

fn payload_str<'a>(
    payload: &'a HashMap<String, qdrant_client::qdrant::Value>,
    key: &str,
) -> Option<&'a str> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.as_str()),
        _ => None,
    }
}

impl VectorBackend for QdrantBackend {
    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))
        })
    }

    fn create_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn create_index(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            for field in INDEXED_FIELDS {
                self.client
                    .create_field_index(
                        CreateFieldIndexCollectionBuilder::new(
                            &collection,
                            field,
                            FieldType::Keyword,
                        )
                        .wait(true),
                    )
                    .await
                    .map_err(|e| VectorStoreError::Index(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn drop_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_by_file(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        let filter = Self::file_filter(file_path);
        Box::pin(async move {
            self.client
                .delete_points(DeletePointsBuilder::new(&collection).points(filter).wait(true))
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
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
            if points.is_empty() {
                return Ok(());
            }
            let points = points
                .into_iter()
                .map(|p| {
                    let payload: HashMap<String, qdrant_client::qdrant::Value> =
                        serde_json::to_value(p.record.to_payload())
                            .and_then(serde_json::from_value)
                            .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                    Ok(PointStruct::new(
                        uuid::Uuid::new_v4().to_string(),
                        p.vector,
                        payload,
                    ))
                })
                .collect::<Result<Vec<_>, VectorStoreError>>()?;

            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Insert(e.to_string()))?;
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
            let response = self
                .client
                .search_points(SearchPointsBuilder::new(&collection, vector, limit).with_payload(true))
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;

            response
                .result
                .into_iter()
                .map(|point| {
                    let record = VectorRecord::from_payload(|k| payload_str(&point.payload, k))?;
                    Ok(ScoredRecord {
                        score: point.score,
                        record,
                    })
                })
                .collect()
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let response = self
                .client
                .count(CountPointsBuilder::new(&collection).exact(true))
                .await
                .map_err(|e| VectorStoreError::Count(e.to_string()))?;
            Ok(response.result.map_or(0, |r| r.count))
        })
    }

    fn count_by_file(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<HashMap<String, u64>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut counts = HashMap::new();
            let mut offset: Option<PointId> = None;

            loop {
                let mut builder = ScrollPointsBuilder::new(&collection)
                    .with_payload(true)
                    .with_vectors(false)
                    .limit(256);
                if let Some(ref off) = offset {
                    builder = builder.offset(off.clone());
                }

                let response = self
                    .client
                    .scroll(builder)
                    .await
                    .map_err(|e| VectorStoreError::Count(e.to_string()))?;

                for point in &response.result {
                    if let Some(file) = payload_str(&point.payload, "file_path") {
                        *counts.entry(file.to_string()).or_insert(0) += 1;
                    }
                }

                match response.next_page_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
            Ok(counts)
        })
    }
}
