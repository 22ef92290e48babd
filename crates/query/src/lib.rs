//! Question answering over a built knowledge graph.
//!
//! A query is embedded and matched against the entity and relation indexes;
//! the matches seed a beam search over the graph whose best paths become the
//! context for the final chat call.

pub mod answer;
pub mod error;
pub mod path;
pub mod retriever;
pub mod scoring;

pub use answer::{AnswerAssembler, build_answer_prompt};
pub use error::QueryError;
pub use path::Path;
pub use retriever::{PathRetriever, Retrieval, RetrievalConfig, ScoredPath};
pub use scoring::{PathScorer, SeedTiers, length_penalty, seed_bonus};

use extract::ChatModel;
use index::{EmbeddingModel, Stores};
use std::sync::Arc;
use tracing::{Instrument, info, info_span};

#[derive(Debug, Clone)]
pub enum QueryAnswer {
    NoRelevantData,
    Answer { text: String, paths: Vec<ScoredPath> },
}

pub struct GraphRagQuery {
    retriever: PathRetriever,
    assembler: AnswerAssembler,
}

impl GraphRagQuery {
    pub fn new(
        config: RetrievalConfig,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        stores: &Stores,
    ) -> Self {
        Self {
            retriever: PathRetriever::new(
                embedder,
                stores.entities.clone(),
                stores.relations.clone(),
                stores.graph.clone(),
                config,
            ),
            assembler: AnswerAssembler::new(chat, stores.graph.clone()),
        }
    }

    /// Retrieve evidence paths and answer from them. The chat model is only
    /// called when at least one path was found.
    pub async fn ask(&self, query: &str) -> Result<QueryAnswer, QueryError> {
        async {
            match self.retriever.retrieve(query).await? {
                Retrieval::NoRelevantData => Ok(QueryAnswer::NoRelevantData),
                Retrieval::Paths { paths, .. } if paths.is_empty() => {
                    info!(query, "matches found but no graph paths");
                    Ok(QueryAnswer::NoRelevantData)
                }
                Retrieval::Paths { paths, .. } => {
                    let text = self.assembler.answer(query, &paths).await?;
                    Ok(QueryAnswer::Answer { text, paths })
                }
            }
        }
        .instrument(info_span!("query"))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::Entity;
    use extract::testing::ScriptedChat;
    use index::testing::HashingEmbedder;
    use index::{GraphStore, VectorStore};

    fn tower(embedder: &HashingEmbedder) -> Entity {
        Entity {
            id: "ent-tower".to_string(),
            name: "Eiffel Tower".to_string(),
            entity_type: "landmark".to_string(),
            desc: "A wrought-iron lattice tower.".to_string(),
            embedding: embedder.embed_text("Eiffel Tower"),
        }
    }

    async fn ask_with(config: RetrievalConfig, in_graph: bool) -> (QueryAnswer, usize) {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashingEmbedder::default());
        let stores = Stores::local(dir.path(), embedder.clone()).await.unwrap();

        let entity = tower(&embedder);
        stores.entities.upsert(vec![entity.clone()]).await.unwrap();
        if in_graph {
            stores.graph.upsert_node(entity).await.unwrap();
        }

        let chat = Arc::new(ScriptedChat::new(|_| Ok("It is in Paris.".to_string())));
        let graphrag = GraphRagQuery::new(config, chat.clone(), embedder, &stores);
        let answer = graphrag.ask("Eiffel Tower").await.unwrap();
        (answer, chat.call_count())
    }

    #[tokio::test]
    async fn test_seed_in_graph_is_answered() {
        let (answer, calls) = ask_with(RetrievalConfig::default(), true).await;
        assert!(matches!(answer, QueryAnswer::Answer { .. }));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_matches_missing_from_graph_skip_the_model() {
        let (answer, calls) = ask_with(RetrievalConfig::default(), false).await;
        assert!(matches!(answer, QueryAnswer::NoRelevantData));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_zero_beam_width_skips_the_model() {
        let config = RetrievalConfig {
            beam_width: 0,
            ..RetrievalConfig::default()
        };
        let (answer, calls) = ask_with(config, true).await;
        assert!(matches!(answer, QueryAnswer::NoRelevantData));
        assert_eq!(calls, 0);
    }
}
