use thiserror::Error;

/// Errors raised by lifetime record storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("record serialization error: {0}")]
    Serialization(String),
}
