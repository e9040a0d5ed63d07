//! Error types for MiniCI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
