use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use super::{
    StorageError, UpsertSummary, VECTOR_KIND, VectorMatch, VectorQuery, VectorRecord, VectorStore, namespace,
};
use crate::embeddings::{EmbeddingModel, embed_one};

/// Vector store backed by a Qdrant collection, spoken to over its REST API.
///
/// The collection is created on first upsert with cosine distance and the
/// dimension of the first record. Payloads hold the record minus its vector.
pub struct QdrantVectorStore<R> {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    ready: OnceCell<()>,
    _record: PhantomData<fn() -> R>,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Serialize)]
struct RetrieveRequest {
    ids: Vec<u64>,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionList {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

#[derive(Deserialize)]
struct ScoredPoint {
    #[serde(default)]
    score: f32,
    payload: Option<serde_json::Value>,
    vector: Option<Vec<f32>>,
}

fn backend(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend {
        backend: "qdrant",
        message: err.to_string(),
    }
}

/// Point id derived from the record id: first 8 bytes of its sha256.
pub fn point_id(record_id: &str) -> u64 {
    let digest = Sha256::digest(record_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

impl<R: VectorRecord> QdrantVectorStore<R> {
    /// `name` becomes the collection `vdb_<name>`.
    pub fn new(base_url: String, name: &str) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            collection_name: namespace(VECTOR_KIND, name),
            embedder: None,
            ready: OnceCell::new(),
            _record: PhantomData,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingModel>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    async fn collection_exists(&self) -> Result<bool, StorageError> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await.map_err(backend)?;

        if !response.status().is_success() {
            return Err(backend(format!("failed to list collections: {}", response.status())));
        }

        let info: QdrantResponse<CollectionList> = response.json().await.map_err(backend)?;
        Ok(info.result.collections.iter().any(|c| c.name == self.collection_name))
    }

    /// Initialize collection with proper schema
    async fn ensure_collection(&self, dimension: usize) -> Result<(), StorageError> {
        self.ready
            .get_or_try_init(|| async {
                if self.collection_exists().await? {
                    info!(collection = %self.collection_name, "collection already exists");
                    return Ok(());
                }

                let url = format!("{}/collections/{}", self.base_url, self.collection_name);
                let create_req = CreateCollection {
                    vectors: VectorParams {
                        size: dimension,
                        distance: "Cosine".to_string(),
                    },
                };

                let response = self.client.put(&url).json(&create_req).send().await.map_err(backend)?;
                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(backend(format!("failed to create collection: {}", error_text)));
                }

                info!(collection = %self.collection_name, dimension, "collection created");
                Ok::<(), StorageError>(())
            })
            .await
            .map(|_| ())
    }

    fn decode(&self, point: ScoredPoint) -> Result<R, StorageError> {
        let payload = point
            .payload
            .ok_or_else(|| backend(format!("point without payload in {}", self.collection_name)))?;
        let mut record: R = serde_json::from_value(payload).map_err(|source| StorageError::Serialization {
            namespace: self.collection_name.clone(),
            source,
        })?;
        if let Some(vector) = point.vector {
            record.set_embedding(vector);
        }
        Ok(record)
    }

    fn payload(&self, record: &R) -> Result<serde_json::Value, StorageError> {
        let mut payload = serde_json::to_value(record).map_err(|source| StorageError::Serialization {
            namespace: self.collection_name.clone(),
            source,
        })?;
        if let Some(map) = payload.as_object_mut() {
            map.remove("embedding");
        }
        Ok(payload)
    }

    async fn retrieve(&self, ids: &[String]) -> Result<Vec<ScoredPoint>, StorageError> {
        let url = format!("{}/collections/{}/points", self.base_url, self.collection_name);
        let request = RetrieveRequest {
            ids: ids.iter().map(|id| point_id(id)).collect(),
            with_payload: true,
            with_vector: true,
        };

        let response = self.client.post(&url).json(&request).send().await.map_err(backend)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(backend(format!("failed to retrieve points: {}", error_text)));
        }

        let points: QdrantResponse<Vec<ScoredPoint>> = response.json().await.map_err(backend)?;
        Ok(points.result)
    }
}

#[async_trait]
impl<R: VectorRecord> VectorStore<R> for QdrantVectorStore<R> {
    fn namespace(&self) -> &str {
        &self.collection_name
    }

    async fn upsert(&self, records: Vec<R>) -> Result<UpsertSummary, StorageError> {
        let Some(first) = records.first() else {
            return Ok(UpsertSummary::default());
        };
        self.ensure_collection(first.embedding().len()).await?;

        let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        let existing: Vec<String> = self
            .get(&ids)
            .await?
            .iter()
            .map(|r| r.id().to_string())
            .collect();

        let points = records
            .iter()
            .map(|r| {
                Ok(Point {
                    id: point_id(r.id()),
                    vector: r.embedding().to_vec(),
                    payload: self.payload(r)?,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let url = format!("{}/collections/{}/points?wait=true", self.base_url, self.collection_name);
        let response = self
            .client
            .put(&url)
            .json(&UpsertPoints { points })
            .send()
            .await
            .map_err(backend)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(backend(format!("failed to upsert points: {}", error_text)));
        }

        let (updated, inserted): (Vec<String>, Vec<String>) = ids.into_iter().partition(|id| existing.contains(id));
        Ok(UpsertSummary { updated, inserted })
    }

    async fn query(
        &self,
        query: VectorQuery<'_>,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorMatch<R>>, StorageError> {
        let vector = match query {
            VectorQuery::Vector(v) => v.to_vec(),
            VectorQuery::Text(text) => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    StorageError::Unsupported(format!("{} has no embedder for text queries", self.collection_name))
                })?;
                embed_one(embedder.as_ref(), text).await.map_err(backend)?
            }
        };

        let url = format!("{}/collections/{}/points/search", self.base_url, self.collection_name);
        let request = SearchRequest {
            vector: &vector,
            limit: top_k,
            score_threshold: threshold,
            with_payload: true,
            with_vector: true,
        };

        let response = self.client.post(&url).json(&request).send().await.map_err(backend)?;
        // Nothing has been written yet.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(backend(format!("search failed: {}", error_text)));
        }

        let points: QdrantResponse<Vec<ScoredPoint>> = response.json().await.map_err(backend)?;
        points
            .result
            .into_iter()
            .map(|p| {
                let similarity = p.score;
                Ok(VectorMatch {
                    record: self.decode(p)?,
                    similarity,
                })
            })
            .collect()
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<R>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: std::collections::HashMap<String, R> = self
            .retrieve(ids)
            .await?
            .into_iter()
            .map(|p| self.decode(p).map(|r| (r.id().to_string(), r)))
            .collect::<Result<_, _>>()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn persist(&self) -> Result<(), StorageError> {
        // Qdrant writes are durable once acknowledged.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::Entity;

    #[test]
    fn test_point_id_is_stable() {
        assert_eq!(point_id("ent-1"), point_id("ent-1"));
        assert_ne!(point_id("ent-1"), point_id("ent-2"));
    }

    #[test]
    fn test_payload_drops_embedding() {
        let store = QdrantVectorStore::<Entity>::new("http://localhost:6333".to_string(), "entities");
        let entity = Entity {
            id: "ent-1".to_string(),
            name: "Paris".to_string(),
            entity_type: "location".to_string(),
            desc: "capital".to_string(),
            embedding: vec![1.0, 2.0],
        };

        let payload = store.payload(&entity).unwrap();
        assert!(payload.get("embedding").is_none());
        assert_eq!(payload["name"], "Paris");
        assert_eq!(store.namespace(), "vdb_entities");

        let point = ScoredPoint {
            score: 0.9,
            payload: Some(payload),
            vector: Some(vec![1.0, 2.0]),
        };
        assert_eq!(store.decode(point).unwrap(), entity);
    }
}
