use std::ops::Range;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::InputError;

/// Token ids produced by [`Tokenizer::encode`].
pub type Tokens = Vec<u32>;

/// How far a window edge may move to reach a character boundary. A character
/// spans at most four byte tokens, and merged tokens can straddle two
/// characters, so real text meets a boundary well within this distance.
const MAX_EDGE_SHIFT: usize = 8;

/// Shared o200k BPE (the gpt-4o encoding). Cheap to clone.
#[derive(Clone)]
pub struct Tokenizer {
    bpe: Arc<CoreBPE>,
}

impl Tokenizer {
    pub fn o200k() -> Result<Self, InputError> {
        let bpe = tiktoken_rs::o200k_base().map_err(|e| InputError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn encode(&self, text: &str) -> Tokens {
        self.bpe.encode_ordinary(text)
    }

    pub fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    pub fn decode(&self, tokens: &[u32]) -> Result<String, InputError> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|e| InputError::Tokenizer(e.to_string()))
    }

    /// Decode `tokens[window]` after moving its edges onto character
    /// boundaries. Leading tokens that continue a character are skipped and
    /// the tail is extended until its last character is complete, so
    /// consecutive windows never lose bytes between them. Returns the text and
    /// the range actually decoded.
    pub fn decode_window(
        &self,
        tokens: &[u32],
        window: Range<usize>,
    ) -> Result<(String, Range<usize>), InputError> {
        for lead in 0..=MAX_EDGE_SHIFT {
            let start = window.start + lead;
            if start > window.end {
                break;
            }
            for extra in 0..=MAX_EDGE_SHIFT {
                let end = window.end + extra;
                if end > tokens.len() {
                    break;
                }
                if let Ok(text) = self.bpe.decode(tokens[start..end].to_vec()) {
                    return Ok((text, start..end));
                }
            }
        }

        Err(InputError::Tokenizer(format!(
            "no character boundary near tokens {}..{}",
            window.start, window.end
        )))
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").field("encoding", &"o200k_base").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let tokenizer = Tokenizer::o200k().unwrap();
        let text = "GraphRAG builds a knowledge graph from documents.";
        let tokens = tokenizer.encode(text);

        assert!(!tokens.is_empty());
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
        assert_eq!(tokenizer.count(text), tokens.len());
    }

    #[test]
    fn test_window_edges_move_to_character_boundaries() {
        let tokenizer = Tokenizer::o200k().unwrap();
        let text = "\u{1F980}\u{9F8D}\u{1F99E}";
        let tokens = tokenizer.encode(text);

        for start in 0..tokens.len() {
            for end in start..=tokens.len() {
                let (decoded, range) = tokenizer.decode_window(&tokens, start..end).unwrap();
                assert!(range.start >= start && range.end >= end);
                assert!(text.contains(&decoded));
            }
        }
    }

    #[test]
    fn test_empty_window() {
        let tokenizer = Tokenizer::o200k().unwrap();
        assert_eq!(tokenizer.decode(&[]).unwrap(), "");
    }
}
