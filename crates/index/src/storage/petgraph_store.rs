use async_trait::async_trait;
use extract::{Entity, Relation};
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use super::{
    EdgeKey, GRAPH_KIND, GraphStats, GraphStore, StorageError, embedding_codec, namespace, read_json_file,
    write_json_file,
};

#[derive(Default)]
struct GraphState {
    graph: StableDiGraph<Entity, Relation>,
    nodes: HashMap<String, NodeIndex>,
    edges: HashMap<String, EdgeIndex>,
}

impl GraphState {
    fn upsert_node(&mut self, entity: Entity) {
        match self.nodes.get(&entity.id) {
            Some(&idx) => self.graph[idx] = entity,
            None => {
                let id = entity.id.clone();
                let idx = self.graph.add_node(entity);
                self.nodes.insert(id, idx);
            }
        }
    }

    fn upsert_edge(&mut self, relation: Relation) -> Result<(), StorageError> {
        let missing = |node_id: &str| StorageError::MissingEndpoint {
            relation_id: relation.id.clone(),
            node_id: node_id.to_string(),
        };
        let source = *self.nodes.get(&relation.source).ok_or_else(|| missing(&relation.source))?;
        let target = *self.nodes.get(&relation.target).ok_or_else(|| missing(&relation.target))?;

        if let Some(&idx) = self.edges.get(&relation.id) {
            if self.graph.edge_endpoints(idx) == Some((source, target)) {
                self.graph[idx] = relation;
                return Ok(());
            }
            self.graph.remove_edge(idx);
        }

        let id = relation.id.clone();
        let idx = self.graph.add_edge(source, target, relation);
        self.edges.insert(id, idx);
        Ok(())
    }

    fn edges(&self, id: &str, direction: Direction) -> Vec<Relation> {
        match self.nodes.get(id) {
            Some(&idx) => self
                .graph
                .edges_directed(idx, direction)
                .map(|e| e.weight().clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Node-link document written to `gdb_<name>.json`.
#[derive(Serialize, Deserialize)]
struct NodeLinkGraph {
    directed: bool,
    multigraph: bool,
    nodes: Vec<NodeRecord>,
    links: Vec<LinkRecord>,
}

#[derive(Serialize, Deserialize)]
struct NodeRecord {
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    entity_type: String,
    desc: String,
    #[serde(with = "embedding_codec", default)]
    embedding: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct LinkRecord {
    source: String,
    target: String,
    key: String,
    name: String,
    desc: String,
    #[serde(with = "embedding_codec", default)]
    embedding: Vec<f32>,
}

impl From<&Entity> for NodeRecord {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            entity_type: e.entity_type.clone(),
            desc: e.desc.clone(),
            embedding: e.embedding.clone(),
        }
    }
}

impl From<NodeRecord> for Entity {
    fn from(n: NodeRecord) -> Self {
        Self {
            id: n.id,
            name: n.name,
            entity_type: n.entity_type,
            desc: n.desc,
            embedding: n.embedding,
        }
    }
}

impl From<&Relation> for LinkRecord {
    fn from(r: &Relation) -> Self {
        Self {
            source: r.source.clone(),
            target: r.target.clone(),
            key: r.id.clone(),
            name: r.name.clone(),
            desc: r.desc.clone(),
            embedding: r.embedding.clone(),
        }
    }
}

impl From<LinkRecord> for Relation {
    fn from(l: LinkRecord) -> Self {
        Self {
            id: l.key,
            source: l.source,
            target: l.target,
            name: l.name,
            desc: l.desc,
            embedding: l.embedding,
        }
    }
}

/// In-process multigraph backed by `petgraph`.
pub struct PetgraphStore {
    namespace: String,
    path: PathBuf,
    state: RwLock<GraphState>,
}

impl PetgraphStore {
    pub async fn open(work_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let namespace = namespace(GRAPH_KIND, name);
        let path = work_dir.join(format!("{}.json", namespace));

        let mut state = GraphState::default();
        if let Some(doc) = read_json_file::<NodeLinkGraph>(&path, &namespace).await? {
            for node in doc.nodes {
                state.upsert_node(node.into());
            }
            for link in doc.links {
                state.upsert_edge(link.into())?;
            }
            info!(
                namespace = %namespace,
                nodes = state.graph.node_count(),
                edges = state.graph.edge_count(),
                "loaded graph"
            );
        }

        Ok(Self {
            namespace,
            path,
            state: RwLock::new(state),
        })
    }
}

#[async_trait]
impl GraphStore for PetgraphStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn upsert_node(&self, entity: Entity) -> Result<(), StorageError> {
        self.state.write().await.upsert_node(entity);
        Ok(())
    }

    async fn upsert_edge(&self, relation: Relation) -> Result<(), StorageError> {
        self.state.write().await.upsert_edge(relation)
    }

    async fn get_node(&self, id: &str) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().await;
        Ok(state.nodes.get(id).map(|&idx| state.graph[idx].clone()))
    }

    async fn get_edge(&self, key: EdgeKey<'_>) -> Result<Option<Relation>, StorageError> {
        let state = self.state.read().await;

        let found = match key {
            EdgeKey::Id(id) => state.edges.get(id).map(|&idx| state.graph[idx].clone()),
            EdgeKey::Triple { source, target, name } => {
                match (state.nodes.get(source), state.nodes.get(target)) {
                    (Some(&s), Some(&t)) => state
                        .graph
                        .edges_connecting(s, t)
                        .find(|e| e.weight().name == name)
                        .map(|e| e.weight().clone()),
                    _ => None,
                }
            }
        };

        Ok(found)
    }

    async fn out_edges(&self, id: &str) -> Result<Vec<Relation>, StorageError> {
        Ok(self.state.read().await.edges(id, Direction::Outgoing))
    }

    async fn in_edges(&self, id: &str) -> Result<Vec<Relation>, StorageError> {
        Ok(self.state.read().await.edges(id, Direction::Incoming))
    }

    async fn node_degree(&self, id: &str) -> Result<usize, StorageError> {
        let state = self.state.read().await;
        Ok(match state.nodes.get(id) {
            Some(&idx) => {
                state.graph.edges_directed(idx, Direction::Outgoing).count()
                    + state.graph.edges_directed(idx, Direction::Incoming).count()
            }
            None => 0,
        })
    }

    async fn stats(&self) -> Result<GraphStats, StorageError> {
        let state = self.state.read().await;
        Ok(GraphStats {
            node_count: state.graph.node_count(),
            edge_count: state.graph.edge_count(),
        })
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let state = self.state.read().await;

        let mut nodes: Vec<NodeRecord> = state.graph.node_weights().map(NodeRecord::from).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut links: Vec<LinkRecord> = state.graph.edge_weights().map(LinkRecord::from).collect();
        links.sort_by(|a, b| a.key.cmp(&b.key));

        let doc = NodeLinkGraph {
            directed: true,
            multigraph: true,
            nodes,
            links,
        };

        write_json_file(&self.path, &self.namespace, &doc).await?;
        info!(namespace = %self.namespace, nodes = doc.nodes.len(), edges = doc.links.len(), "persisted graph");
        Ok(())
    }
}
