use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A token-bounded window of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    /// Position of the window within its document.
    pub index: usize,
    pub text: String,
    pub token_size: usize,
}

impl Chunk {
    pub fn new(doc_id: String, index: usize, text: String, token_size: usize) -> Self {
        // Generate stable chunk_id from content
        let chunk_id = hash_id("chunk", &text);

        Self {
            chunk_id,
            doc_id,
            index,
            text,
            token_size,
        }
    }
}

/// Namespaced content hash: `<prefix>-<32 hex chars>`.
pub fn hash_id(prefix: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    format!("{}-{}", prefix, hex::encode(&result[..16])) // Use first 16 bytes (32 hex chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_content_hash() {
        let a = Chunk::new("doc-a".to_string(), 0, "same text".to_string(), 2);
        let b = Chunk::new("doc-b".to_string(), 3, "same text".to_string(), 2);
        let c = Chunk::new("doc-a".to_string(), 0, "other text".to_string(), 2);

        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert!(a.chunk_id.starts_with("chunk-"));
        assert_eq!(a.chunk_id.len(), "chunk-".len() + 32);
    }
}
