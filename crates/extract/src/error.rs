use thiserror::Error;

use crate::llm::ModelError;
use crate::schema::ObjectKind;

/// Chunk-local extraction failure. The chunk is skipped, the run continues.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("model call failed while extracting {kind} from chunk {chunk_id}")]
    Model {
        chunk_id: String,
        kind: ObjectKind,
        #[source]
        source: ModelError,
    },

    #[error("malformed {kind} JSON from chunk {chunk_id}")]
    MalformedJson {
        chunk_id: String,
        kind: ObjectKind,
        #[source]
        source: serde_json::Error,
    },
}

impl ExtractionError {
    pub fn chunk_id(&self) -> &str {
        match self {
            ExtractionError::Model { chunk_id, .. } => chunk_id,
            ExtractionError::MalformedJson { chunk_id, .. } => chunk_id,
        }
    }
}
