use thiserror::Error;

pub type AudienceResult<T> = Result<T, AudienceError>;

#[derive(Error, Debug)]
pub enum AudienceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
