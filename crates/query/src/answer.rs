use extract::{ChatModel, ChatRequest};
use index::GraphStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::QueryError;
use crate::retriever::ScoredPath;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityContext {
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationContext {
    pub source: String,
    pub target: String,
    pub name: String,
    pub desc: String,
}

/// Turns retrieved paths into a grounded answer.
pub struct AnswerAssembler {
    chat: Arc<dyn ChatModel>,
    graph: Arc<dyn GraphStore>,
}

impl AnswerAssembler {
    pub fn new(chat: Arc<dyn ChatModel>, graph: Arc<dyn GraphStore>) -> Self {
        Self { chat, graph }
    }

    pub async fn answer(&self, query: &str, paths: &[ScoredPath]) -> Result<String, QueryError> {
        let (entities, relations) = self.flatten(paths).await?;
        debug!(
            entities = entities.len(),
            relations = relations.len(),
            "assembled answer context"
        );

        let prompt = build_answer_prompt(query, &entities, &relations);
        let answer = self
            .chat
            .chat(ChatRequest::new(prompt))
            .await
            .map_err(QueryError::model("generating answer"))?;
        Ok(answer.trim().to_string())
    }

    /// Unique entities and relations across all paths, first occurrence wins.
    pub async fn flatten(
        &self,
        paths: &[ScoredPath],
    ) -> Result<(Vec<EntityContext>, Vec<RelationContext>), QueryError> {
        let mut seen_entities = HashSet::new();
        let mut seen_relations = HashSet::new();
        let mut entities = Vec::new();
        let mut relations = Vec::new();

        for scored in paths {
            for node in scored.path.nodes() {
                if seen_entities.insert(node.id.as_str()) {
                    entities.push(EntityContext {
                        name: node.name.clone(),
                        desc: node.desc.clone(),
                    });
                }
            }

            for edge in scored.path.edges() {
                if !seen_relations.insert(edge.id.as_str()) {
                    continue;
                }
                relations.push(RelationContext {
                    source: self.node_name(&edge.source).await?,
                    target: self.node_name(&edge.target).await?,
                    name: edge.name.clone(),
                    desc: edge.desc.clone(),
                });
            }
        }

        Ok((entities, relations))
    }

    async fn node_name(&self, id: &str) -> Result<String, QueryError> {
        Ok(self
            .graph
            .get_node(id)
            .await?
            .map(|node| node.name)
            .unwrap_or_else(|| id.to_string()))
    }
}

pub fn build_answer_prompt(query: &str, entities: &[EntityContext], relations: &[RelationContext]) -> String {
    let mut context = String::from("ENTITIES:\n");
    for entity in entities {
        context.push_str(&format!("- {}: {}\n", entity.name, one_line(&entity.desc)));
    }

    context.push_str("\nRELATIONSHIPS:\n");
    for relation in relations {
        context.push_str(&format!(
            "- {} -[{}]-> {}: {}\n",
            relation.source,
            relation.name,
            relation.target,
            one_line(&relation.desc)
        ));
    }

    format!(
        r#"You are a helpful assistant answering questions from a knowledge graph.

{}
USER QUESTION: {}

INSTRUCTIONS:
- Answer the question using only the entities and relationships above
- Follow relationships to connect facts spread across several entities
- If the knowledge graph doesn't contain enough information, say so
- Keep your answer concise and factual

ANSWER:"#,
        context, query
    )
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;
    use extract::testing::ScriptedChat;
    use extract::{Entity, Relation};
    use index::storage::PetgraphStore;

    fn node(id: &str, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: "location".to_string(),
            desc: format!("About\n{name}."),
            embedding: vec![1.0],
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Relation {
        Relation {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            name: "located in".to_string(),
            desc: "Physical location.".to_string(),
            embedding: vec![1.0],
        }
    }

    #[tokio::test]
    async fn test_shared_elements_are_listed_once() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(PetgraphStore::open(dir.path(), "kg").await.unwrap());
        for n in [node("t", "Eiffel Tower"), node("p", "Paris"), node("f", "France")] {
            graph.upsert_node(n).await.unwrap();
        }
        graph.upsert_edge(edge("r1", "t", "p")).await.unwrap();
        graph.upsert_edge(edge("r2", "p", "f")).await.unwrap();

        let short = Path::seed(node("t", "Eiffel Tower")).extend(edge("r1", "t", "p"), node("p", "Paris"));
        let long = short.extend(edge("r2", "p", "f"), node("f", "France"));
        let paths = vec![
            ScoredPath { path: long, score: 0.9 },
            ScoredPath { path: short, score: 0.8 },
        ];

        let chat = Arc::new(ScriptedChat::new(|_| Ok(" The tower is in Paris. ".to_string())));
        let assembler = AnswerAssembler::new(chat.clone(), graph);

        let (entities, relations) = assembler.flatten(&paths).await.unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].source, "Eiffel Tower");
        assert_eq!(relations[0].target, "Paris");

        let answer = assembler.answer("Where is the Eiffel Tower?", &paths).await.unwrap();
        assert_eq!(answer, "The tower is in Paris.");

        let calls = chat.calls();
        let prompt = &calls[0].prompt;
        assert!(prompt.contains("- Eiffel Tower: About Eiffel Tower."));
        assert!(prompt.contains("- Paris -[located in]-> France: Physical location."));
        assert!(prompt.contains("USER QUESTION: Where is the Eiffel Tower?"));
        assert_eq!(prompt.matches("- Paris:").count(), 1);
    }
}
