//! Build pipeline: chunk, extract in parallel, merge in order, build the graph.

use extract::{ChatModel, Entity, ExtractionError, Extractor, Relation, resolve_endpoints};
use ingest::{Chunk, Chunker, Document};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, info, info_span, warn};
use uuid::Uuid;

use crate::builder::GraphBuilder;
use crate::chain::{MergeChain, MergeTurn};
use crate::embeddings::EmbeddingModel;
use crate::error::PipelineError;
use crate::merge::MergeEngine;
use crate::metrics::{BuildMetrics, TimedOperation};
use crate::storage::{
    GraphStats, GraphStore, JsonKvStore, JsonVectorStore, KvStore, PetgraphStore, StorageError, VectorStore,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Continuation rounds per extraction; 0 disables loop extraction.
    pub max_rounds: usize,
    pub merge_threshold: f32,
    /// Merged descriptions longer than this are summarized before writing.
    pub summary_tokens: usize,
    /// Cap on in-flight extraction calls. `None` is unbounded.
    pub max_concurrent_chunks: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 0,
            merge_threshold: 0.8,
            summary_tokens: 128,
            max_concurrent_chunks: None,
        }
    }
}

/// The storage collaborators of one knowledge graph.
#[derive(Clone)]
pub struct Stores {
    pub entities: Arc<dyn VectorStore<Entity>>,
    pub relations: Arc<dyn VectorStore<Relation>>,
    pub graph: Arc<dyn GraphStore>,
    pub chunks: Arc<dyn KvStore<Chunk>>,
}

impl Stores {
    /// File-backed stores under `work_dir`: `vdb_entities.json`,
    /// `vdb_relations.json`, `gdb_kg.json` and `kvdb_chunks.json`.
    pub async fn local(work_dir: &Path, embedder: Arc<dyn EmbeddingModel>) -> Result<Self, StorageError> {
        let entities = JsonVectorStore::<Entity>::open(work_dir, "entities")
            .await?
            .with_embedder(embedder.clone());
        let relations = JsonVectorStore::<Relation>::open(work_dir, "relations")
            .await?
            .with_embedder(embedder);

        Ok(Self {
            entities: Arc::new(entities),
            relations: Arc::new(relations),
            graph: Arc::new(PetgraphStore::open(work_dir, "kg").await?),
            chunks: Arc::new(JsonKvStore::<Chunk>::open(work_dir, "chunks").await?),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    pub chunk_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub run_id: Uuid,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    /// Already recorded by an earlier run.
    pub chunks_skipped: usize,
    pub chunks_failed: usize,
    pub failed_chunks: Vec<FailedChunk>,
    pub entities_new: usize,
    pub entities_merged: usize,
    pub relations_new: usize,
    pub relations_merged: usize,
    pub relations_dropped: usize,
    pub graph: GraphStats,
    pub elapsed_ms: u64,
}

/// What one chunk contributed. `failure` is set when an extraction step was skipped;
/// ids merged before the failure are still reported.
struct ChunkOutcome {
    chunk: Chunk,
    entity_ids: Vec<String>,
    relation_ids: Vec<String>,
    failure: Option<ExtractionError>,
}

/// Per-run state shared by the chunk tasks.
struct ChunkWorker {
    extractor: Arc<Extractor>,
    entities: Arc<MergeEngine<Entity>>,
    relations: Arc<MergeEngine<Relation>>,
    limiter: Option<Arc<Semaphore>>,
    metrics: BuildMetrics,
}

impl ChunkWorker {
    /// Run a model extraction under the concurrency cap.
    async fn limited<T>(&self, extraction: impl Future<Output = T>) -> T {
        let _permit = match &self.limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };
        extraction.await
    }

    async fn process(
        self: Arc<Self>,
        chunk: Chunk,
        entity_turn: MergeTurn,
        relation_turn: MergeTurn,
    ) -> Result<ChunkOutcome, PipelineError> {
        let chunk_id = chunk.chunk_id.clone();
        let mut outcome = ChunkOutcome {
            chunk,
            entity_ids: Vec::new(),
            relation_ids: Vec::new(),
            failure: None,
        };
        let text = outcome.chunk.text.clone();

        info!(chunk_id = %chunk_id, "extracting entities");
        let extracted = match self.limited(self.extractor.extract_entities(&chunk_id, &text)).await {
            Ok(entities) => entities,
            Err(err) => {
                warn!(chunk_id = %chunk_id, error = %err, "entity extraction failed, skipping chunk");
                entity_turn.forward().await?;
                relation_turn.forward().await?;
                outcome.failure = Some(err);
                return Ok(outcome);
            }
        };

        let held = entity_turn.acquire().await?;
        let decision = self
            .entities
            .decide(&chunk_id, extracted.into_iter().map(Entity::from).collect())
            .await?;
        self.metrics
            .record_entities(decision.inserts.len(), decision.updates.len());

        let mut name_to_id: HashMap<String, String> = decision.aliases.iter().cloned().collect();
        let mut grounding = Vec::new();
        for entity in decision.updates.iter().chain(&decision.inserts) {
            name_to_id.insert(entity.name.clone(), entity.id.clone());
            grounding.push((entity.name.clone(), entity.entity_type.clone()));
        }
        outcome.entity_ids = decision.ids().map(str::to_string).collect();

        if decision.is_empty() {
            held.release(None);
        } else {
            let persist = self.entities.clone().persist(decision).instrument(Span::current());
            held.release(Some(tokio::spawn(persist)));
        }

        info!(chunk_id = %chunk_id, "extracting relations");
        let extracted = match self
            .limited(self.extractor.extract_relations(&chunk_id, &text, &grounding))
            .await
        {
            Ok(relations) => relations,
            Err(err) => {
                warn!(chunk_id = %chunk_id, error = %err, "relation extraction failed, skipping chunk");
                relation_turn.forward().await?;
                outcome.failure = Some(err);
                return Ok(outcome);
            }
        };

        let extracted_count = extracted.len();
        let resolved = resolve_endpoints(&chunk_id, extracted, &name_to_id);
        let dropped = extracted_count - resolved.len();

        let held = relation_turn.acquire().await?;
        let decision = self
            .relations
            .decide(&chunk_id, resolved.into_iter().map(Relation::from).collect())
            .await?;
        self.metrics
            .record_relations(decision.inserts.len(), decision.updates.len(), dropped);
        outcome.relation_ids = decision.ids().map(str::to_string).collect();

        if decision.is_empty() {
            held.release(None);
        } else {
            let persist = self.relations.clone().persist(decision).instrument(Span::current());
            held.release(Some(tokio::spawn(persist)));
        }

        Ok(outcome)
    }
}

pub struct GraphRagPipeline {
    config: PipelineConfig,
    chunker: Chunker,
    extractor: Arc<Extractor>,
    entities: Arc<MergeEngine<Entity>>,
    relations: Arc<MergeEngine<Relation>>,
    builder: GraphBuilder,
    stores: Stores,
}

impl GraphRagPipeline {
    pub fn new(
        config: PipelineConfig,
        chunker: Chunker,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        stores: Stores,
    ) -> Self {
        let tokenizer = chunker.tokenizer().clone();
        let entities = MergeEngine::new(
            stores.entities.clone(),
            embedder.clone(),
            chat.clone(),
            tokenizer.clone(),
            config.merge_threshold,
            config.summary_tokens,
        );
        let relations = MergeEngine::new(
            stores.relations.clone(),
            embedder,
            chat.clone(),
            tokenizer,
            config.merge_threshold,
            config.summary_tokens,
        );

        Self {
            extractor: Arc::new(Extractor::new(chat, config.max_rounds)),
            entities: Arc::new(entities),
            relations: Arc::new(relations),
            builder: GraphBuilder::new(stores.entities.clone(), stores.relations.clone(), stores.graph.clone()),
            config,
            chunker,
            stores,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Build or extend the knowledge graph from `documents`.
    pub async fn build(&self, documents: &BTreeMap<String, Document>) -> Result<BuildReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("build", run_id = %run_id);
        self.run(run_id, documents).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, documents: &BTreeMap<String, Document>) -> Result<BuildReport, PipelineError> {
        let timer = TimedOperation::start();

        let chunks = self.chunker.chunk_documents(documents)?;
        let chunks_total = chunks.len();

        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let pending = self.stores.chunks.filter_keys(&ids).await?;
        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| pending.contains(&c.chunk_id))
            .collect();
        let chunks_skipped = chunks_total - chunks.len();

        info!(documents = documents.len(), chunks = chunks_total, skipped = chunks_skipped, "starting build");

        let worker = Arc::new(ChunkWorker {
            extractor: self.extractor.clone(),
            entities: self.entities.clone(),
            relations: self.relations.clone(),
            limiter: self
                .config
                .max_concurrent_chunks
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            metrics: BuildMetrics::default(),
        });

        let (entity_turns, entity_tail) = MergeChain::new(chunks.len());
        let (relation_turns, relation_tail) = MergeChain::new(chunks.len());

        let mut tasks = JoinSet::new();
        for ((chunk, entity_turn), relation_turn) in chunks.into_iter().zip(entity_turns).zip(relation_turns) {
            let worker = worker.clone();
            tasks.spawn(
                worker
                    .process(chunk, entity_turn, relation_turn)
                    .instrument(Span::current()),
            );
        }

        let mut entity_ids = BTreeSet::new();
        let mut relation_ids = BTreeSet::new();
        let mut processed = Vec::new();
        let mut failed_chunks = Vec::new();
        let mut errors = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    worker.metrics.record_chunk(outcome.failure.is_none());
                    entity_ids.extend(outcome.entity_ids);
                    relation_ids.extend(outcome.relation_ids);
                    match outcome.failure {
                        Some(err) => failed_chunks.push(FailedChunk {
                            chunk_id: outcome.chunk.chunk_id,
                            error: err.to_string(),
                        }),
                        None => processed.push((outcome.chunk.chunk_id.clone(), outcome.chunk)),
                    }
                }
                Ok(Err(err)) => {
                    if errors.is_empty() {
                        warn!(error = %err, "build failed, aborting remaining chunks");
                        tasks.abort_all();
                    }
                    errors.push(err);
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if errors.is_empty() {
                        tasks.abort_all();
                    }
                    errors.push(PipelineError::Task(join_err));
                }
            }
        }

        if !errors.is_empty() {
            // ChainBroken only echoes the failure that broke the chain.
            let index = errors
                .iter()
                .position(|e| !matches!(e, PipelineError::ChainBroken))
                .unwrap_or(0);
            return Err(errors.swap_remove(index));
        }

        entity_tail.finish().await?;
        relation_tail.finish().await?;
        self.stores.entities.persist().await?;
        self.stores.relations.persist().await?;

        let entity_ids: Vec<String> = entity_ids.into_iter().collect();
        let relation_ids: Vec<String> = relation_ids.into_iter().collect();
        self.builder.build(&entity_ids, &relation_ids).await?;

        self.stores.chunks.upsert(processed).await?;
        self.stores.chunks.persist().await?;

        let graph = self.stores.graph.stats().await?;
        let metrics = worker.metrics.snapshot();
        let report = BuildReport {
            run_id,
            chunks_total,
            chunks_processed: metrics.chunks_processed,
            chunks_skipped,
            chunks_failed: metrics.chunks_failed,
            failed_chunks,
            entities_new: metrics.entities_new,
            entities_merged: metrics.entities_merged,
            relations_new: metrics.relations_new,
            relations_merged: metrics.relations_merged,
            relations_dropped: metrics.relations_dropped,
            graph,
            elapsed_ms: timer.elapsed().as_millis() as u64,
        };

        info!(
            processed = report.chunks_processed,
            failed = report.chunks_failed,
            nodes = graph.node_count,
            edges = graph.edge_count,
            elapsed_ms = report.elapsed_ms,
            "build finished"
        );
        Ok(report)
    }
}
