use async_trait::async_trait;
use dashmap::DashMap;
use extract::ModelError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::embeddings::EmbeddingModel;

/// Embedding model wrapper that remembers vectors by text hash.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingModel>,
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingModel>, max_entries: usize) -> Self {
        Self {
            inner,
            embeddings: DashMap::new(),
            max_entries,
        }
    }

    fn set_embedding(&self, key: String, embedding: Vec<f32>) {
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        self.embeddings.insert(key, embedding);
    }

    fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embeddings.len(),
        }
    }
}

#[async_trait]
impl EmbeddingModel for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let keys: Vec<String> = texts.iter().map(|t| Self::hash_text(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = keys
            .iter()
            .map(|k| self.embeddings.get(k).map(|r| r.value().clone()))
            .collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| results[i].is_none()).collect();
        debug!(hits = texts.len() - missing.len(), misses = missing.len(), "embedding cache lookup");

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed(&batch).await?;

            for (&i, embedding) in missing.iter().zip(fresh) {
                self.set_embedding(keys[i].clone(), embedding.clone());
                results[i] = Some(embedding);
            }
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| ModelError::InvalidResponse("embedding batch too short".to_string())))
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        texts: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModel for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn test_cache_only_embeds_misses() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        });
        let cache = CachedEmbedder::new(inner.clone(), 100);

        let first = cache.embed(&["a".to_string(), "bbb".to_string()]).await.unwrap();
        let second = cache.embed(&["bbb".to_string(), "cc".to_string()]).await.unwrap();

        assert_eq!(first, vec![vec![1.0], vec![3.0]]);
        assert_eq!(second, vec![vec![3.0], vec![2.0]]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner.texts.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().embeddings_cached, 3);
    }

    #[tokio::test]
    async fn test_cache_evicts_when_full() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        });
        let cache = CachedEmbedder::new(inner, 4);

        let texts: Vec<String> = (0..6).map(|i| "x".repeat(i + 1)).collect();
        cache.embed(&texts).await.unwrap();

        assert!(cache.stats().embeddings_cached <= 4);
    }
}
