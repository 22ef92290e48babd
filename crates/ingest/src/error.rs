use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while turning source documents into chunks.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("document '{doc_id}' has no content")]
    MissingContent { doc_id: String },

    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse documents from {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid chunker config: {0}")]
    InvalidConfig(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}
