pub mod chunk;
pub mod chunker;
pub mod error;
pub mod reader;
pub mod tokenizer;

pub use chunk::{Chunk, hash_id};
pub use chunker::{Chunker, ChunkerConfig, token_windows};
pub use error::InputError;
pub use reader::{Document, FileReader};
pub use tokenizer::Tokenizer;

use sha2::{Digest, Sha256};

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

