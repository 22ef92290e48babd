use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{
    StorageError, UpsertSummary, VECTOR_KIND, VectorMatch, VectorQuery, VectorRecord, VectorStore,
    namespace, read_json_file, write_json_file,
};
use crate::embeddings::{EmbeddingModel, embed_one};
use crate::similarity::cosine_similarity;

#[derive(Serialize, Deserialize)]
#[serde(bound = "R: VectorRecord")]
struct VectorFile<R> {
    embedding_dim: usize,
    data: BTreeMap<String, R>,
}

/// Brute-force cosine index kept in memory and saved as `vdb_<name>.json`.
pub struct JsonVectorStore<R> {
    namespace: String,
    path: PathBuf,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    data: RwLock<BTreeMap<String, R>>,
}

impl<R: VectorRecord> JsonVectorStore<R> {
    /// Open the store under `work_dir`, loading a previous save if present.
    pub async fn open(work_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let namespace = namespace(VECTOR_KIND, name);
        let path = work_dir.join(format!("{}.json", namespace));

        let data = match read_json_file::<VectorFile<R>>(&path, &namespace).await? {
            Some(file) => {
                info!(namespace = %namespace, records = file.data.len(), "loaded vector store");
                file.data
            }
            None => BTreeMap::new(),
        };

        Ok(Self {
            namespace,
            path,
            embedder: None,
            data: RwLock::new(data),
        })
    }

    /// Enables [`VectorQuery::Text`].
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingModel>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    async fn query_vector(&self, query: VectorQuery<'_>) -> Result<Vec<f32>, StorageError> {
        match query {
            VectorQuery::Vector(v) => Ok(v.to_vec()),
            VectorQuery::Text(text) => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    StorageError::Unsupported(format!("{} has no embedder for text queries", self.namespace))
                })?;
                embed_one(embedder.as_ref(), text)
                    .await
                    .map_err(|e| StorageError::Backend {
                        backend: "embedder",
                        message: e.to_string(),
                    })
            }
        }
    }
}

#[async_trait]
impl<R: VectorRecord> VectorStore<R> for JsonVectorStore<R> {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn upsert(&self, records: Vec<R>) -> Result<UpsertSummary, StorageError> {
        let mut data = self.data.write().await;
        let mut summary = UpsertSummary::default();

        for record in records {
            let id = record.id().to_string();
            if data.insert(id.clone(), record).is_some() {
                summary.updated.push(id);
            } else {
                summary.inserted.push(id);
            }
        }

        Ok(summary)
    }

    async fn query(
        &self,
        query: VectorQuery<'_>,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorMatch<R>>, StorageError> {
        let vector = self.query_vector(query).await?;
        let data = self.data.read().await;

        let mut matches: Vec<VectorMatch<R>> = data
            .values()
            .filter(|r| !r.embedding().is_empty())
            .map(|r| VectorMatch {
                similarity: cosine_similarity(&vector, r.embedding()),
                record: r.clone(),
            })
            .filter(|m| m.similarity >= threshold)
            .collect();

        // Ties resolve by id so results are reproducible.
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.id().cmp(b.record.id()))
        });
        matches.truncate(top_k);

        Ok(matches)
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<R>, StorageError> {
        let data = self.data.read().await;
        Ok(ids.iter().filter_map(|id| data.get(id).cloned()).collect())
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let data = self.data.read().await;
        let file = VectorFile {
            embedding_dim: data.values().map(|r| r.embedding().len()).next().unwrap_or(0),
            data: data.clone(),
        };

        write_json_file(&self.path, &self.namespace, &file).await?;
        info!(namespace = %self.namespace, records = file.data.len(), "persisted vector store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::Entity;

    fn entity(id: &str, embedding: Vec<f32>) -> Entity {
        Entity {
            id: id.to_string(),
            name: id.to_uppercase(),
            entity_type: "concept".to_string(),
            desc: format!("about {}", id),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_reports_inserted_and_updated() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVectorStore::<Entity>::open(dir.path(), "entities").await.unwrap();

        let first = store.upsert(vec![entity("a", vec![1.0, 0.0])]).await.unwrap();
        let second = store
            .upsert(vec![entity("a", vec![0.0, 1.0]), entity("b", vec![1.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(first.inserted, vec!["a"]);
        assert_eq!(second.updated, vec!["a"]);
        assert_eq!(second.inserted, vec!["b"]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_query_threshold_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVectorStore::<Entity>::open(dir.path(), "entities").await.unwrap();
        store
            .upsert(vec![
                entity("exact", vec![1.0, 0.0]),
                entity("close", vec![0.9, 0.1]),
                entity("far", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let matches = store.query(VectorQuery::Vector(&[1.0, 0.0]), 5, 0.5).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.record.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close"]);

        let top = store.query(VectorQuery::Vector(&[1.0, 0.0]), 1, 0.0).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].record.id, "exact");
    }

    #[tokio::test]
    async fn test_text_query_requires_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVectorStore::<Entity>::open(dir.path(), "entities").await.unwrap();

        let result = store.query(VectorQuery::Text("paris"), 5, 0.5).await;
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonVectorStore::<Entity>::open(dir.path(), "entities").await.unwrap();
            store.upsert(vec![entity("a", vec![0.5, 0.5])]).await.unwrap();
            store.persist().await.unwrap();
        }

        assert!(dir.path().join("vdb_entities.json").exists());

        let reopened = JsonVectorStore::<Entity>::open(dir.path(), "entities").await.unwrap();
        let records = reopened.get(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].embedding, vec![0.5, 0.5]);
    }
}
