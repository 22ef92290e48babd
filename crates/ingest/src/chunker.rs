use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::error::InputError;
use crate::reader::Document;
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            overlap_tokens: 128,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), InputError> {
        if self.max_tokens == 0 {
            return Err(InputError::InvalidConfig("max_tokens must be positive".to_string()));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(InputError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

pub struct Chunker {
    config: ChunkerConfig,
    tokenizer: Tokenizer,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, tokenizer: Tokenizer) -> Result<Self, InputError> {
        config.validate()?;
        Ok(Self { config, tokenizer })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Chunk every document, in document order. Identical chunk texts collapse
    /// onto one chunk id; the first occurrence wins.
    pub fn chunk_documents(
        &self,
        documents: &BTreeMap<String, Document>,
    ) -> Result<Vec<Chunk>, InputError> {
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();

        for (doc_id, document) in documents {
            let content = document
                .content
                .as_deref()
                .ok_or_else(|| InputError::MissingContent {
                    doc_id: doc_id.clone(),
                })?;

            for chunk in self.chunk_text(doc_id, content)? {
                if seen.insert(chunk.chunk_id.clone()) {
                    chunks.push(chunk);
                }
            }
        }

        Ok(chunks)
    }

    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Result<Vec<Chunk>, InputError> {
        let tokens = self.tokenizer.encode(text);
        let windows = token_windows(tokens.len(), self.config.max_tokens, self.config.overlap_tokens);

        let mut chunks = Vec::with_capacity(windows.len());
        for (index, window) in windows.into_iter().enumerate() {
            let (content, decoded) = self.tokenizer.decode_window(&tokens, window.clone())?;
            if decoded != window {
                warn!(
                    doc_id,
                    index,
                    window = ?window,
                    decoded = ?decoded,
                    "window edge moved to a character boundary"
                );
            }
            let token_size = decoded.len();
            chunks.push(Chunk::new(
                doc_id.to_string(),
                index,
                content.trim().to_string(),
                token_size,
            ));
        }

        debug!(doc_id, tokens = tokens.len(), chunks = chunks.len(), "chunked document");
        Ok(chunks)
    }
}

/// Sliding windows of `max_tokens` advancing by `max_tokens - overlap_tokens`.
/// The last window ends exactly at `total`.
pub fn token_windows(total: usize, max_tokens: usize, overlap_tokens: usize) -> Vec<Range<usize>> {
    let step = max_tokens.saturating_sub(overlap_tokens).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + max_tokens).min(total);
        windows.push(start..end);
        if end == total {
            break;
        }
        start += step;
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_tokens: usize, overlap_tokens: usize) -> Chunker {
        Chunker::new(
            ChunkerConfig {
                max_tokens,
                overlap_tokens,
            },
            Tokenizer::o200k().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_windows_advance_by_step() {
        let windows = token_windows(25, 10, 2);
        assert_eq!(windows, vec![0..10, 8..18, 16..25]);
    }

    #[test]
    fn test_windows_reconstruct_sequence() {
        for (total, max, overlap) in [(25, 10, 2), (100, 7, 3), (9, 10, 2), (64, 16, 0)] {
            let windows = token_windows(total, max, overlap);
            let mut rebuilt: Vec<usize> = Vec::new();

            for (i, window) in windows.iter().enumerate() {
                assert!(window.len() <= max);
                let skip = if i == 0 { 0 } else { overlap };
                rebuilt.extend(window.clone().skip(skip));
            }

            assert_eq!(rebuilt, (0..total).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_empty_document_has_no_windows() {
        assert!(token_windows(0, 10, 2).is_empty());
    }

    #[test]
    fn test_invalid_config() {
        let tokenizer = Tokenizer::o200k().unwrap();
        let config = ChunkerConfig {
            max_tokens: 10,
            overlap_tokens: 10,
        };
        assert!(matches!(
            Chunker::new(config, tokenizer),
            Err(InputError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_basic_chunking() {
        let chunker = chunker(12, 4);
        let words: Vec<String> = (0..60).map(|i| format!("word{}", i)).collect();
        let text = words.join(" ");

        let chunks = chunker.chunk_text("test-doc", &text).unwrap();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.doc_id, "test-doc");
            assert_eq!(chunk.index, i);
            assert!(chunk.token_size <= 12);
            assert_eq!(chunk.text, chunk.text.trim());
        }
        assert!(chunks[0].text.starts_with("word0"));
        assert!(chunks.last().unwrap().text.ends_with("word59"));
    }

    /// CJK ideographs interleaved with emoji: many characters span several
    /// byte tokens, so window edges regularly fall inside a character.
    fn multibyte_text() -> String {
        (0..120u32)
            .flat_map(|i| {
                let ideograph = char::from_u32(0x4E00 + i * 37).unwrap();
                let emoji = char::from_u32(0x1F980 + i % 24).unwrap();
                [ideograph, emoji]
            })
            .collect()
    }

    #[test]
    fn test_multibyte_chunks_cover_source() {
        let text = multibyte_text();

        for overlap in [0, 1, 2] {
            let chunks = chunker(5, overlap).chunk_text("cjk", &text).unwrap();
            assert!(chunks.len() > 1);

            // each chunk is a slice of the source starting inside what is
            // already covered
            let mut covered = 0;
            for chunk in &chunks {
                let start = text.find(&chunk.text).unwrap();
                assert!(start <= covered, "gap before chunk {} (overlap {overlap})", chunk.index);
                covered = covered.max(start + chunk.text.len());
            }
            assert_eq!(covered, text.len());
        }
    }

    #[test]
    fn test_disjoint_multibyte_chunks_join_to_source() {
        let text = multibyte_text();
        let chunks = chunker(7, 0).chunk_text("cjk", &text).unwrap();

        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_chunk_ids_are_stable() {
        let chunker = chunker(16, 4);
        let text = "Paris is the capital of France. Berlin is the capital of Germany.";

        let first = chunker.chunk_text("doc", text).unwrap();
        let second = chunker.chunk_text("doc", text).unwrap();

        let ids = |chunks: &[Chunk]| chunks.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_missing_content() {
        let chunker = chunker(16, 4);
        let mut documents = BTreeMap::new();
        documents.insert("doc-1".to_string(), Document::new("Some text."));
        documents.insert(
            "doc-2".to_string(),
            Document {
                content: None,
                source: None,
            },
        );

        let err = chunker.chunk_documents(&documents).unwrap_err();
        assert!(matches!(err, InputError::MissingContent { doc_id } if doc_id == "doc-2"));
    }

    #[test]
    fn test_duplicate_content_collapses() {
        let chunker = chunker(16, 4);
        let mut documents = BTreeMap::new();
        documents.insert("a".to_string(), Document::new("The same short note."));
        documents.insert("b".to_string(), Document::new("The same short note."));

        let chunks = chunker.chunk_documents(&documents).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc_id, "a");
    }
}
