use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing required setting: {0}")]
    MissingSetting(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("training data not found at {}", .0.display())]
    TrainingDataNotFound(PathBuf),
    #[error("training data at {} has no usable entries", .0.display())]
    EmptyTrainingData(PathBuf),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("failed to load model from {}: {source}", .path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("prediction failed for {name:?}: {reason}")]
    Prediction { name: String, reason: String },
    #[error("file ids not present in the store: {}", .0.join(", "))]
    MissingFileIds(Vec<String>),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
