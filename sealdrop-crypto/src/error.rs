//! Error types for the cipher engine.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors produced while deriving keys, sealing, opening or decoding.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The AEAD tag did not verify. Wrong password and corrupted data are
    /// deliberately reported the same way.
    #[error("wrong password or corrupted file")]
    Authentication,

    /// Malformed base64, or an IV/salt of the wrong length.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),
}
