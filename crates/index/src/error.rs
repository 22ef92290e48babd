use extract::ModelError;
use ingest::InputError;
use thiserror::Error;

use crate::storage::StorageError;

/// Run-level failure. Any of these aborts a build.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("model call failed during {stage}")]
    Model {
        stage: &'static str,
        #[source]
        source: ModelError,
    },

    #[error("pipeline task failed")]
    Task(#[from] tokio::task::JoinError),

    /// A predecessor in the merge order stopped without handing over its turn.
    #[error("merge chain broken")]
    ChainBroken,
}

impl PipelineError {
    pub(crate) fn model(stage: &'static str) -> impl FnOnce(ModelError) -> Self {
        move |source| PipelineError::Model { stage, source }
    }
}
