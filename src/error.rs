//! Error types for renderq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A conditional write lost its race: the stored status no longer
    /// matched the expected one.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("worker is not ready: {0}")]
    WorkerNotReady(String),

    #[error("no tasks available")]
    NoPendingTasks,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP-equivalent status code for callers exposing these operations
    /// over the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) | Error::NoPendingTasks => 404,
            Error::WorkerNotReady(_) | Error::Validation(_) => 400,
            Error::InvalidTransition { .. } | Error::Conflict(_) => 409,
            Error::Config(_) | Error::Storage(_) | Error::Io(_) | Error::Other(_) => 500,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
