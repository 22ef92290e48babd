use extract::ModelError;
use index::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("model call failed while {stage}: {source}")]
    Model {
        stage: &'static str,
        #[source]
        source: ModelError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueryError {
    pub(crate) fn model(stage: &'static str) -> impl FnOnce(ModelError) -> Self {
        move |source| Self::Model { stage, source }
    }
}
