//! Crate-wide error type

use burn::record::RecorderError;
use burn::tensor::DataError;
use thiserror::Error;

/// Errors surfaced by the problem layer, the policy and the trainer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed batch: {0}")]
    Shape(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Tensor readback failed: {0:?}")]
    Tensor(DataError),

    #[error("Recorder error: {0}")]
    Record(#[from] RecorderError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<DataError> for Error {
    fn from(err: DataError) -> Self {
        Error::Tensor(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
