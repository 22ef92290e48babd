use extract::{Entity, Relation};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::storage::{GraphStore, StorageError, VectorStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphUpdate {
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
    pub edges_skipped: usize,
}

/// Writes the merged view of a run into the graph store.
pub struct GraphBuilder {
    entities: Arc<dyn VectorStore<Entity>>,
    relations: Arc<dyn VectorStore<Relation>>,
    graph: Arc<dyn GraphStore>,
}

impl GraphBuilder {
    pub fn new(
        entities: Arc<dyn VectorStore<Entity>>,
        relations: Arc<dyn VectorStore<Relation>>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            entities,
            relations,
            graph,
        }
    }

    /// Upsert the current version of every touched entity, then every touched
    /// relation whose endpoints are in the graph.
    pub async fn build(&self, entity_ids: &[String], relation_ids: &[String]) -> Result<GraphUpdate, StorageError> {
        let mut update = GraphUpdate::default();

        for entity in self.entities.get(entity_ids).await? {
            self.graph.upsert_node(entity).await?;
            update.nodes_upserted += 1;
        }

        for relation in self.relations.get(relation_ids).await? {
            let source = self.graph.get_node(&relation.source).await?;
            let target = self.graph.get_node(&relation.target).await?;
            if source.is_none() || target.is_none() {
                warn!(
                    relation_id = %relation.id,
                    source = %relation.source,
                    target = %relation.target,
                    "skipping edge with missing endpoint"
                );
                update.edges_skipped += 1;
                continue;
            }

            self.graph.upsert_edge(relation).await?;
            update.edges_upserted += 1;
        }

        self.graph.persist().await?;

        info!(
            nodes = update.nodes_upserted,
            edges = update.edges_upserted,
            skipped = update.edges_skipped,
            "graph updated"
        );
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonVectorStore, PetgraphStore};

    #[tokio::test]
    async fn test_build_skips_edges_without_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let entities = Arc::new(JsonVectorStore::<Entity>::open(dir.path(), "entities").await.unwrap());
        let relations = Arc::new(JsonVectorStore::<Relation>::open(dir.path(), "relations").await.unwrap());
        let graph = Arc::new(PetgraphStore::open(dir.path(), "kg").await.unwrap());

        let node = |id: &str| Entity {
            id: id.to_string(),
            name: id.to_string(),
            entity_type: "location".to_string(),
            desc: String::new(),
            embedding: vec![1.0],
        };
        let edge = |id: &str, source: &str, target: &str| Relation {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            name: "near".to_string(),
            desc: String::new(),
            embedding: vec![1.0],
        };

        entities.upsert(vec![node("a"), node("b")]).await.unwrap();
        relations
            .upsert(vec![edge("r1", "a", "b"), edge("r2", "a", "ghost")])
            .await
            .unwrap();

        let builder = GraphBuilder::new(entities, relations, graph.clone());
        let update = builder
            .build(
                &["a".to_string(), "b".to_string()],
                &["r1".to_string(), "r2".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(
            update,
            GraphUpdate {
                nodes_upserted: 2,
                edges_upserted: 1,
                edges_skipped: 1
            }
        );
        assert_eq!(graph.out_edges("a").await.unwrap().len(), 1);
        assert!(dir.path().join("gdb_kg.json").exists());
    }
}
