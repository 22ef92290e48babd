//! Storage collaborators: vector, graph and key-value stores.
//!
//! Every store is scoped to a namespace `{kind}_{name}` fixed at construction
//! (`vdb_entities`, `gdb_kg`, `kvdb_chunks`, ...).

pub mod json_kv;
pub mod json_vector;
pub mod neo4j;
pub mod petgraph_store;
pub mod qdrant;

pub use json_kv::JsonKvStore;
pub use json_vector::JsonVectorStore;
pub use neo4j::Neo4jGraphStore;
pub use petgraph_store::PetgraphStore;
pub use qdrant::QdrantVectorStore;

use async_trait::async_trait;
use extract::{Entity, Relation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

pub const VECTOR_KIND: &str = "vdb";
pub const GRAPH_KIND: &str = "gdb";
pub const KV_KIND: &str = "kvdb";

pub fn namespace(kind: &str, name: &str) -> String {
    format!("{}_{}", kind, name)
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {namespace}")]
    Serialization {
        namespace: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("relation {relation_id} references missing node {node_id}")]
    MissingEndpoint { relation_id: String, node_id: String },

    #[error("{backend} error: {message}")]
    Backend { backend: &'static str, message: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// A record that can live in a vector store.
pub trait VectorRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn embedding(&self) -> &[f32];
    fn set_embedding(&mut self, embedding: Vec<f32>);
}

impl VectorRecord for Entity {
    fn id(&self) -> &str {
        &self.id
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = embedding;
    }
}

impl VectorRecord for Relation {
    fn id(&self) -> &str {
        &self.id
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = embedding;
    }
}

#[derive(Debug, Clone, Copy)]
pub enum VectorQuery<'a> {
    Vector(&'a [f32]),
    /// Embedded by the store; only stores built with an embedder accept it.
    Text(&'a str),
}

#[derive(Debug, Clone)]
pub struct VectorMatch<R> {
    pub record: R,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub updated: Vec<String>,
    pub inserted: Vec<String>,
}

#[async_trait]
pub trait VectorStore<R: VectorRecord>: Send + Sync {
    fn namespace(&self) -> &str;

    async fn upsert(&self, records: Vec<R>) -> Result<UpsertSummary, StorageError>;

    /// Up to `top_k` records with similarity >= `threshold`, most similar first.
    async fn query(
        &self,
        query: VectorQuery<'_>,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorMatch<R>>, StorageError>;

    /// Records for the given ids; unknown ids are skipped.
    async fn get(&self, ids: &[String]) -> Result<Vec<R>, StorageError>;

    async fn persist(&self) -> Result<(), StorageError>;
}

/// Lookup key for a graph edge.
#[derive(Debug, Clone, Copy)]
pub enum EdgeKey<'a> {
    Id(&'a str),
    Triple {
        source: &'a str,
        target: &'a str,
        name: &'a str,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// Directed multigraph of entities (nodes) and relations (edges).
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn namespace(&self) -> &str;

    async fn upsert_node(&self, entity: Entity) -> Result<(), StorageError>;

    /// Both endpoints must already exist.
    async fn upsert_edge(&self, relation: Relation) -> Result<(), StorageError>;

    async fn get_node(&self, id: &str) -> Result<Option<Entity>, StorageError>;

    async fn get_edge(&self, key: EdgeKey<'_>) -> Result<Option<Relation>, StorageError>;

    async fn out_edges(&self, id: &str) -> Result<Vec<Relation>, StorageError>;

    async fn in_edges(&self, id: &str) -> Result<Vec<Relation>, StorageError>;

    async fn node_degree(&self, id: &str) -> Result<usize, StorageError>;

    async fn stats(&self) -> Result<GraphStats, StorageError>;

    async fn persist(&self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait KvStore<V>: Send + Sync
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn namespace(&self) -> &str;

    async fn get(&self, id: &str) -> Result<Option<V>, StorageError>;

    /// The subset of `ids` not yet stored.
    async fn filter_keys(&self, ids: &[String]) -> Result<HashSet<String>, StorageError>;

    async fn upsert(&self, items: Vec<(String, V)>) -> Result<(), StorageError>;

    async fn persist(&self) -> Result<(), StorageError>;
}

/// Embeddings are stored as comma-joined decimal strings by the graph backends.
pub(crate) mod embedding_codec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(embedding: &[f32]) -> String {
        embedding
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn decode(raw: &str) -> Result<Vec<f32>, std::num::ParseFloatError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<f32>)
            .collect()
    }

    pub fn serialize<S: Serializer>(embedding: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(embedding))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        decode(&raw).map_err(serde::de::Error::custom)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_codec_round_trip() {
            let embedding = vec![0.25, -1.5, 3.0];
            assert_eq!(encode(&embedding), "0.25,-1.5,3");
            assert_eq!(decode(&encode(&embedding)).unwrap(), embedding);
            assert!(decode("").unwrap().is_empty());
            assert!(decode("1.0,abc").is_err());
        }
    }
}

pub(crate) async fn read_json_file<T: DeserializeOwned>(
    path: &std::path::Path,
    namespace: &str,
) -> Result<Option<T>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Serialization {
                namespace: namespace.to_string(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub(crate) async fn write_json_file<T: Serialize>(
    path: &std::path::Path,
    namespace: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialization {
        namespace: namespace.to_string(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
}
