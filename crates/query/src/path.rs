use extract::{Entity, Relation};
use serde::Serialize;
use std::fmt;

/// An alternating `entity, relation, entity, ...` walk through the graph.
///
/// Always holds at least the seed node, so `nodes.len() == edges.len() + 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    nodes: Vec<Entity>,
    edges: Vec<Relation>,
}

impl Path {
    pub fn seed(node: Entity) -> Self {
        Self {
            nodes: vec![node],
            edges: Vec::new(),
        }
    }

    /// A copy of this path with `[edge, node]` appended.
    pub fn extend(&self, edge: Relation, node: Entity) -> Self {
        let mut next = self.clone();
        next.edges.push(edge);
        next.nodes.push(node);
        next
    }

    /// Number of elements, entities and relations alike.
    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn last(&self) -> &Entity {
        // never empty: constructed through `seed`
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn nodes(&self) -> &[Entity] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Relation] {
        &self.edges
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Embeddings in path order.
    pub fn embeddings(&self) -> impl Iterator<Item = &[f32]> {
        let mut edges = self.edges.iter();
        self.nodes.iter().enumerate().flat_map(move |(i, node)| {
            let edge = if i > 0 { edges.next() } else { None };
            edge.map(|e| e.embedding.as_slice())
                .into_iter()
                .chain(std::iter::once(node.embedding.as_slice()))
        })
    }

    /// Ids in path order. Two paths with the same ids are the same walk.
    pub fn element_ids(&self) -> Vec<&str> {
        let mut ids = Vec::with_capacity(self.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                ids.push(self.edges[i - 1].id.as_str());
            }
            ids.push(node.id.as_str());
        }
        ids
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nodes[0].name)?;
        for (edge, node) in self.edges.iter().zip(&self.nodes[1..]) {
            if edge.source == node.id {
                write!(f, " <-[{}]- {}", edge.name, node.name)?;
            } else {
                write!(f, " -[{}]-> {}", edge.name, node.name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, embedding: Vec<f32>) -> Entity {
        Entity {
            id: id.to_string(),
            name: id.to_uppercase(),
            entity_type: "thing".to_string(),
            desc: String::new(),
            embedding,
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Relation {
        Relation {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            name: "near".to_string(),
            desc: String::new(),
            embedding: vec![9.0],
        }
    }

    #[test]
    fn test_extend_keeps_alternation() {
        let seed = Path::seed(node("a", vec![1.0]));
        let path = seed
            .extend(edge("r1", "a", "b"), node("b", vec![2.0]))
            .extend(edge("r2", "c", "b"), node("c", vec![3.0]));

        assert_eq!(seed.len(), 1);
        assert_eq!(path.len(), 5);
        assert_eq!(path.last().id, "c");
        assert_eq!(path.element_ids(), vec!["a", "r1", "b", "r2", "c"]);
        let embeddings: Vec<f32> = path.embeddings().map(|e| e[0]).collect();
        assert_eq!(embeddings, vec![1.0, 9.0, 2.0, 9.0, 3.0]);
        assert!(path.contains_node("b"));
        assert!(!path.contains_node("r1"));
        assert_eq!(path.to_string(), "A -[near]-> B <-[near]- C");
    }
}
