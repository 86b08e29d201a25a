use thiserror::Error;

/// Crate-wide error type.
///
/// Variants are grouped roughly by the failure domain named in the design's
/// error-handling policy: transport/framing, protocol, executor, HTTP, and
/// replicated-log errors all land here rather than in domain-specific enums,
/// mirroring the teacher's single flat `DbError`.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL parsing error: {0}")]
    SqlParse(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("pool exhausted for {0}")]
    PoolExhausted(String),

    #[error("replicated log error: {0}")]
    Log(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<bincode::error::EncodeError> for DbError {
    fn from(e: bincode::error::EncodeError) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for DbError {
    fn from(e: bincode::error::DecodeError) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for DbError {
    fn from(e: reqwest::Error) -> Self {
        DbError::Transport(e.to_string())
    }
}
