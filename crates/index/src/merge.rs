//! Identity resolution by embedding similarity.
//!
//! A fresh object either merges into its nearest stored neighbour (taking over
//! its id and name, descriptions concatenated) or is minted under a new
//! content-hash id. Deciding is cheap and ordered by the merge chain; writing
//! the result back runs in a detached [`MergeEngine::persist`] task.

use extract::{ChatModel, ChatRequest, Entity, ObjectKind, Relation, prompt::build_summary_prompt};
use ingest::{Tokenizer, hash_id};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingModel;
use crate::error::PipelineError;
use crate::similarity::blend;
use crate::storage::{VectorQuery, VectorRecord, VectorStore};

/// Weight of the name embedding in the blended vector.
pub const NAME_WEIGHT: f32 = 0.7;

/// An entity or relation that can be merged by similarity.
pub trait Mergeable: VectorRecord {
    const KIND: ObjectKind;

    fn name(&self) -> &str;
    fn desc(&self) -> &str;
    fn set_desc(&mut self, desc: String);
    fn set_id(&mut self, id: String);

    /// Fields that tell this object apart when it has no description.
    fn identity(&self) -> String;

    /// Take over the stored object's identity.
    fn adopt(&mut self, existing: &Self);
}

impl Mergeable for Entity {
    const KIND: ObjectKind = ObjectKind::Entities;

    fn name(&self) -> &str {
        &self.name
    }

    fn desc(&self) -> &str {
        &self.desc
    }

    fn set_desc(&mut self, desc: String) {
        self.desc = desc;
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn identity(&self) -> String {
        format!("{}\u{1f}{}", self.name, self.entity_type)
    }

    fn adopt(&mut self, existing: &Self) {
        self.id = existing.id.clone();
        self.name = existing.name.clone();
    }
}

impl Mergeable for Relation {
    const KIND: ObjectKind = ObjectKind::Relations;

    fn name(&self) -> &str {
        &self.name
    }

    fn desc(&self) -> &str {
        &self.desc
    }

    fn set_desc(&mut self, desc: String) {
        self.desc = desc;
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn identity(&self) -> String {
        format!("{}\u{1f}{}\u{1f}{}", self.source, self.name, self.target)
    }

    fn adopt(&mut self, existing: &Self) {
        self.id = existing.id.clone();
        self.name = existing.name.clone();
        self.source = existing.source.clone();
        self.target = existing.target.clone();
    }
}

/// Outcome of one chunk's merge step for one kind.
#[derive(Debug, Clone)]
pub struct MergeDecision<R> {
    /// Objects folded into an existing id.
    pub updates: Vec<R>,
    /// Objects minted under a new id.
    pub inserts: Vec<R>,
    /// `(extracted name, resolved id)` in input order.
    pub aliases: Vec<(String, String)>,
}

impl<R: Mergeable> MergeDecision<R> {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.updates.iter().chain(&self.inserts).map(|r| r.id())
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty()
    }
}

pub struct MergeEngine<R> {
    store: Arc<dyn VectorStore<R>>,
    embedder: Arc<dyn EmbeddingModel>,
    chat: Arc<dyn ChatModel>,
    tokenizer: Tokenizer,
    threshold: f32,
    summary_tokens: usize,
}

impl<R: Mergeable> MergeEngine<R> {
    pub fn new(
        store: Arc<dyn VectorStore<R>>,
        embedder: Arc<dyn EmbeddingModel>,
        chat: Arc<dyn ChatModel>,
        tokenizer: Tokenizer,
        threshold: f32,
        summary_tokens: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
            tokenizer,
            threshold,
            summary_tokens,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore<R>> {
        &self.store
    }

    /// Set each item's embedding to `0.7 * embed(name) + 0.3 * embed(desc)`.
    pub async fn embed_blended(&self, items: &mut [R]) -> Result<(), PipelineError> {
        if items.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = items.iter().map(|r| r.name().to_string()).collect();
        let descs: Vec<String> = items.iter().map(|r| r.desc().to_string()).collect();

        let (name_vecs, desc_vecs) = tokio::try_join!(self.embedder.embed(&names), self.embedder.embed(&descs))
            .map_err(PipelineError::model("embed"))?;

        for ((item, name), desc) in items.iter_mut().zip(&name_vecs).zip(&desc_vecs) {
            item.set_embedding(blend(name, desc, NAME_WEIGHT));
        }
        Ok(())
    }

    /// Resolve each item against the store. Must run while holding the merge turn.
    pub async fn decide(&self, chunk_id: &str, mut items: Vec<R>) -> Result<MergeDecision<R>, PipelineError> {
        self.embed_blended(&mut items).await?;

        let mut decision = MergeDecision {
            updates: Vec::new(),
            inserts: Vec::new(),
            aliases: Vec::with_capacity(items.len()),
        };

        for mut item in items {
            let extracted_name = item.name().to_string();
            let nearest = self
                .store
                .query(VectorQuery::Vector(item.embedding()), 1, self.threshold)
                .await?;

            match nearest.into_iter().next() {
                Some(hit) => {
                    info!(
                        chunk_id,
                        kind = %R::KIND,
                        object = item.name(),
                        into = hit.record.id(),
                        similarity = hit.similarity,
                        "merged"
                    );
                    let desc = format!("{}\n{}", item.desc(), hit.record.desc());
                    item.adopt(&hit.record);
                    item.set_desc(desc);
                    decision.aliases.push((extracted_name, item.id().to_string()));
                    decision.updates.push(item);
                }
                None => {
                    let id = mint_id(chunk_id, &item);
                    info!(chunk_id, kind = %R::KIND, object = item.name(), id = %id, "new");
                    item.set_id(id);
                    decision.aliases.push((extracted_name, item.id().to_string()));
                    decision.inserts.push(item);
                }
            }
        }

        Ok(decision)
    }

    /// Summarize overlong merged descriptions, re-embed updates and write everything back.
    pub async fn persist(self: Arc<Self>, decision: MergeDecision<R>) -> Result<(), PipelineError> {
        let MergeDecision { mut updates, inserts, .. } = decision;

        for item in updates.iter_mut() {
            let tokens = self.tokenizer.count(item.desc());
            if tokens <= self.summary_tokens {
                continue;
            }

            debug!(kind = %R::KIND, object = item.name(), tokens, "summarizing description");
            let request = ChatRequest::new(build_summary_prompt(item.name(), item.desc()))
                .with_max_tokens(self.summary_tokens as u32);
            let summary = self
                .chat
                .chat(request)
                .await
                .map_err(PipelineError::model("summarize"))?;
            item.set_desc(summary.trim().to_string());
        }

        self.embed_blended(&mut updates).await?;

        let mut records = updates;
        records.extend(inserts);
        if records.is_empty() {
            return Ok(());
        }

        let summary = self.store.upsert(records).await?;
        debug!(
            namespace = self.store.namespace(),
            updated = summary.updated.len(),
            inserted = summary.inserted.len(),
            "merge persisted"
        );
        Ok(())
    }
}

/// Content-hash id over the description, or over the identity fields when
/// the model gave no description.
fn mint_id<R: Mergeable>(chunk_id: &str, item: &R) -> String {
    if item.desc().trim().is_empty() {
        warn!(chunk_id, kind = %R::KIND, object = item.name(), "empty description, id taken from name");
        hash_id(R::KIND.id_prefix(), &item.identity())
    } else {
        hash_id(R::KIND.id_prefix(), item.desc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonVectorStore;
    use crate::testing::HashingEmbedder;
    use extract::testing::ScriptedChat;

    fn entity(name: &str, desc: &str) -> Entity {
        Entity {
            id: String::new(),
            name: name.to_string(),
            entity_type: "location".to_string(),
            desc: desc.to_string(),
            embedding: Vec::new(),
        }
    }

    async fn engine(
        dir: &std::path::Path,
        chat: Arc<ScriptedChat>,
        summary_tokens: usize,
    ) -> Arc<MergeEngine<Entity>> {
        let store = Arc::new(JsonVectorStore::<Entity>::open(dir, "entities").await.unwrap());
        Arc::new(MergeEngine::new(
            store,
            Arc::new(HashingEmbedder::default()),
            chat,
            Tokenizer::o200k().unwrap(),
            0.8,
            summary_tokens,
        ))
    }

    #[tokio::test]
    async fn test_new_then_merge() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(ScriptedChat::new(|_| Ok("unused".to_string())));
        let engine = engine(dir.path(), chat.clone(), 128).await;

        let first = engine
            .decide("c1", vec![entity("Paris", "Paris is the capital of France.")])
            .await
            .unwrap();
        assert_eq!(first.inserts.len(), 1);
        let paris_id = first.inserts[0].id.clone();
        assert_eq!(paris_id, hash_id("ent", "Paris is the capital of France."));
        engine.clone().persist(first).await.unwrap();

        let second = engine
            .decide("c2", vec![entity("Paris", "Paris hosts the Eiffel Tower.")])
            .await
            .unwrap();
        assert_eq!(second.updates.len(), 1);
        assert!(second.inserts.is_empty());
        let merged = &second.updates[0];
        assert_eq!(merged.id, paris_id);
        assert_eq!(
            merged.desc,
            "Paris hosts the Eiffel Tower.\nParis is the capital of France."
        );
        engine.clone().persist(second).await.unwrap();

        let stored = engine.store().get(&[paris_id]).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].desc.contains("Eiffel"));
        assert!(stored[0].desc.contains("capital"));
        // short descriptions are never summarized
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unrelated_names_do_not_merge() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(ScriptedChat::new(|_| Ok("unused".to_string())));
        let engine = engine(dir.path(), chat, 128).await;

        let first = engine.decide("c1", vec![entity("Paris", "A city.")]).await.unwrap();
        engine.clone().persist(first).await.unwrap();

        let second = engine
            .decide("c2", vec![entity("Tokyo Tower", "A broadcasting tower in Japan.")])
            .await
            .unwrap();
        assert_eq!(second.inserts.len(), 1);
    }

    #[tokio::test]
    async fn test_long_merged_description_is_summarized() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(ScriptedChat::new(|_| Ok("  Paris, capital city.  ".to_string())));
        let engine = engine(dir.path(), chat.clone(), 8).await;

        let first = engine
            .decide("c1", vec![entity("Paris", "Paris is the capital and largest city of France.")])
            .await
            .unwrap();
        let paris_id = first.inserts[0].id.clone();
        // inserts are never summarized
        engine.clone().persist(first).await.unwrap();
        assert_eq!(chat.call_count(), 0);

        let second = engine
            .decide("c2", vec![entity("Paris", "Paris is home to the Louvre museum.")])
            .await
            .unwrap();
        engine.clone().persist(second).await.unwrap();

        assert_eq!(chat.call_count(), 1);
        assert_eq!(chat.calls()[0].max_tokens, Some(8));
        let stored = engine.store().get(&[paris_id]).await.unwrap();
        assert_eq!(stored[0].desc, "Paris, capital city.");
    }
}
