//! Seeded beam search over the knowledge graph.

use extract::{Entity, Relation};
use index::{EmbeddingModel, GraphStore, VectorQuery, VectorStore, embed_one};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::QueryError;
use crate::path::Path;
use crate::scoring::{PathScorer, SeedTiers};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Matches taken from each vector store.
    pub top_k: usize,
    /// Minimum similarity for a match to count at all.
    pub base_threshold: f32,
    /// Minimum similarity for the high seed tier.
    pub sim_threshold: f32,
    pub beam_width: usize,
    pub max_depth: usize,
    pub max_paths: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            base_threshold: 0.5,
            sim_threshold: 0.7,
            beam_width: 5,
            max_depth: 5,
            max_paths: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredPath {
    pub path: Path,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub enum Retrieval {
    /// Nothing in either vector store cleared the base threshold.
    NoRelevantData,
    Paths { paths: Vec<ScoredPath>, tiers: SeedTiers },
}

pub struct PathRetriever {
    embedder: Arc<dyn EmbeddingModel>,
    entities: Arc<dyn VectorStore<Entity>>,
    relations: Arc<dyn VectorStore<Relation>>,
    graph: Arc<dyn GraphStore>,
    config: RetrievalConfig,
}

impl PathRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingModel>,
        entities: Arc<dyn VectorStore<Entity>>,
        relations: Arc<dyn VectorStore<Relation>>,
        graph: Arc<dyn GraphStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            entities,
            relations,
            graph,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, QueryError> {
        let query_embedding = embed_one(self.embedder.as_ref(), query)
            .await
            .map_err(QueryError::model("embedding query"))?;

        let tiers = self.seed_tiers(&query_embedding).await?;
        if tiers.is_empty() {
            info!(query, "no relevant data");
            return Ok(Retrieval::NoRelevantData);
        }
        debug!(high = tiers.high.len(), low = tiers.low.len(), "seed tiers");

        let paths = self.beam_search(&query_embedding, &tiers).await?;
        info!(query, paths = paths.len(), "retrieved paths");
        Ok(Retrieval::Paths { paths, tiers })
    }

    async fn seed_tiers(&self, query: &[f32]) -> Result<SeedTiers, QueryError> {
        let (entity_hits, relation_hits) = tokio::try_join!(
            self.entities
                .query(VectorQuery::Vector(query), self.config.top_k, self.config.base_threshold),
            self.relations
                .query(VectorQuery::Vector(query), self.config.top_k, self.config.base_threshold),
        )?;

        let mut tiers = SeedTiers::default();
        for hit in entity_hits {
            self.tier_for(&mut tiers, hit.similarity).insert(hit.record.id);
        }
        for hit in relation_hits {
            let tier = self.tier_for(&mut tiers, hit.similarity);
            tier.insert(hit.record.source);
            tier.insert(hit.record.target);
        }
        Ok(tiers)
    }

    fn tier_for<'t>(&self, tiers: &'t mut SeedTiers, similarity: f32) -> &'t mut BTreeSet<String> {
        if similarity >= self.config.sim_threshold {
            &mut tiers.high
        } else {
            &mut tiers.low
        }
    }

    async fn beam_search(&self, query: &[f32], tiers: &SeedTiers) -> Result<Vec<ScoredPath>, QueryError> {
        let scorer = PathScorer::new(query, tiers);
        let width = self.config.beam_width;

        let mut beams = Vec::new();
        for id in tiers.seeds() {
            // matched records may not have reached the graph yet
            if let Some(node) = self.graph.get_node(id).await? {
                let path = Path::seed(node);
                let score = scorer.score(&path);
                beams.push(ScoredPath { path, score });
            }
        }
        rank(&mut beams);
        beams.truncate(width);

        let mut visited = Vec::new();
        for depth in 0..self.config.max_depth {
            let mut next = Vec::new();
            for beam in &beams {
                for path in self.expand(&beam.path).await? {
                    let score = scorer.score(&path);
                    next.push(ScoredPath { path, score });
                }
                visited.push(beam.clone());
            }

            if next.is_empty() {
                debug!(depth, "frontier exhausted");
                break;
            }
            rank(&mut next);
            next.truncate(width);
            beams = next;
        }

        visited.extend(beams);
        rank(&mut visited);

        let mut seen = HashSet::new();
        visited.retain(|p| seen.insert(p.path.element_ids().join("\u{1f}")));
        visited.truncate(self.config.max_paths);
        Ok(visited)
    }

    /// One-step extensions of `path` through out- then in-edges of its last
    /// node, skipping entities already on the path.
    async fn expand(&self, path: &Path) -> Result<Vec<Path>, QueryError> {
        let last = &path.last().id;
        let mut extended = Vec::new();

        for edge in self.graph.out_edges(last).await? {
            if path.contains_node(&edge.target) {
                continue;
            }
            if let Some(node) = self.graph.get_node(&edge.target).await? {
                extended.push(path.extend(edge, node));
            }
        }
        for edge in self.graph.in_edges(last).await? {
            if path.contains_node(&edge.source) {
                continue;
            }
            if let Some(node) = self.graph.get_node(&edge.source).await? {
                extended.push(path.extend(edge, node));
            }
        }
        Ok(extended)
    }
}

/// Highest score first; equal scores keep their order.
fn rank(paths: &mut [ScoredPath]) {
    paths.sort_by(|a, b| b.score.total_cmp(&a.score));
}
