use anyhow::{Context, Result};
use extract::{ChatModel, Entity, OllamaClient, Relation};
use index::storage::{JsonKvStore, Neo4jGraphStore, QdrantVectorStore};
use index::{CachedEmbedder, EmbeddingClient, EmbeddingModel, Stores};
use ingest::Chunk;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AppConfig, StorageBackend};

/// Model clients and stores wired from one configuration.
pub struct App {
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub stores: Stores,
}

impl App {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.models.request_timeout_secs);

        let chat = OllamaClient::new(config.models.ollama_url.clone(), config.models.chat_model.clone())
            .with_retry(config.retry_policy())
            .with_timeout(timeout)
            .context("failed to build chat client")?;

        let embedding_client =
            EmbeddingClient::new(config.models.ollama_url.clone(), config.models.embedding_model.clone())
                .with_retry(config.retry_policy())
                .with_timeout(timeout)
                .context("failed to build embedding client")?;
        let embedder: Arc<dyn EmbeddingModel> = if config.cache.enabled {
            Arc::new(CachedEmbedder::new(Arc::new(embedding_client), config.cache.max_entries))
        } else {
            Arc::new(embedding_client)
        };

        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .with_context(|| format!("failed to create {}", config.work_dir.display()))?;

        let stores = match config.storage.backend {
            StorageBackend::Local => Stores::local(&config.work_dir, embedder.clone())
                .await
                .context("failed to open local stores")?,
            StorageBackend::Remote => remote_stores(config, embedder.clone()).await?,
        };
        info!(
            backend = ?config.storage.backend,
            work_dir = %config.work_dir.display(),
            "stores ready"
        );

        Ok(Self {
            chat: Arc::new(chat),
            embedder,
            stores,
        })
    }
}

async fn remote_stores(config: &AppConfig, embedder: Arc<dyn EmbeddingModel>) -> Result<Stores> {
    let storage = &config.storage;

    let graph = Neo4jGraphStore::connect(
        &storage.neo4j_uri,
        &storage.neo4j_user,
        &storage.neo4j_password,
        "kg",
    )
    .await
    .context("failed to connect to Neo4j")?;
    graph.init_schema().await.context("failed to create Neo4j indexes")?;

    let entities = QdrantVectorStore::<Entity>::new(storage.qdrant_url.clone(), "entities").with_embedder(embedder.clone());
    let relations = QdrantVectorStore::<Relation>::new(storage.qdrant_url.clone(), "relations").with_embedder(embedder);

    // processed-chunk ledger stays local in both modes
    let chunks = JsonKvStore::<Chunk>::open(&config.work_dir, "chunks")
        .await
        .context("failed to open chunk ledger")?;

    Ok(Stores {
        entities: Arc::new(entities),
        relations: Arc::new(relations),
        graph: Arc::new(graph),
        chunks: Arc::new(chunks),
    })
}
