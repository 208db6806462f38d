//! Share lifecycle error types.

use sealdrop_crypto::CryptoError;
use thiserror::Error;

/// Result type for share operations.
pub type ShareResult<T> = Result<T, ShareError>;

/// Errors reported by the share record lifecycle.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("file not found")]
    NotFound,

    #[error("file has expired")]
    Expired,

    #[error("maximum downloads reached")]
    LimitReached,

    #[error("payload too large: {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("corrupt upload: expected about {expected} bytes, got {actual}")]
    CorruptUpload { expected: u64, actual: u64 },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transfer interrupted: {0}")]
    Transfer(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ShareError {
    /// Whether the caller may retry the same operation with the same inputs.
    ///
    /// Gating, validation and encoding failures are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShareError::Storage(_) | ShareError::Transfer(_))
    }

    /// Status code a transport layer should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ShareError::NotFound => 404,
            ShareError::Expired => 410,
            ShareError::LimitReached => 403,
            ShareError::PayloadTooLarge { .. } => 413,
            ShareError::CorruptUpload { .. } | ShareError::Encoding(_) => 422,
            ShareError::InvalidRequest(_) => 400,
            ShareError::Storage(_)
            | ShareError::Transfer(_)
            | ShareError::Config(_)
            | ShareError::Serialization(_) => 500,
        }
    }
}

impl From<std::io::Error> for ShareError {
    fn from(e: std::io::Error) -> Self {
        ShareError::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for ShareError {
    fn from(e: rusqlite::Error) -> Self {
        ShareError::Storage(e.to_string())
    }
}

impl From<CryptoError> for ShareError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Encoding(msg) => ShareError::Encoding(msg),
            other => ShareError::InvalidRequest(other.to_string()),
        }
    }
}
