use thiserror::Error;

/// Result type for engine operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors surfaced by the engine and its stores.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl FlowError {
    pub fn not_found(what: impl Into<String>) -> Self {
        FlowError::NotFound(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        FlowError::Validation(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        FlowError::Conflict(what.into())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Codec(e.to_string())
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(e: serde_yaml::Error) -> Self {
        FlowError::Codec(e.to_string())
    }
}
