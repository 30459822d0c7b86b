use thiserror::Error;

/// Errors produced by the dialogue engine and its storage backends
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Step execution failed: {0}")]
    StepFailed(String),

    #[error("Chain limit of {0} steps exceeded in a single turn")]
    ChainLimitExceeded(usize),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        FlowError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::StorageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
