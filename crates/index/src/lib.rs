pub mod builder;
pub mod cache;
pub mod chain;
pub mod embeddings;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod pipeline;
pub mod similarity;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use builder::{GraphBuilder, GraphUpdate};
pub use cache::CachedEmbedder;
pub use embeddings::{EmbeddingClient, EmbeddingModel, embed_one};
pub use error::PipelineError;
pub use merge::{MergeDecision, MergeEngine, Mergeable};
pub use pipeline::{BuildReport, FailedChunk, GraphRagPipeline, PipelineConfig, Stores};
pub use similarity::cosine_similarity;
pub use storage::{
    EdgeKey, GraphStats, GraphStore, KvStore, StorageError, VectorMatch, VectorQuery, VectorRecord, VectorStore,
};
