//! Password-based key derivation.

use crate::encoding;
use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the derived symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the key-derivation salt in bytes.
pub const SALT_SIZE: usize = 16;

/// PBKDF2-HMAC-SHA256 round count. Part of wire format v1; changing it
/// makes every stored file undecryptable.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A symmetric key derived from a password. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Random salt mixed into key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh salt from the thread-local CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    pub fn from_base64(text: &str) -> CryptoResult<Self> {
        encoding::decode_fixed::<SALT_SIZE>(text, "salt").map(Self)
    }
}

/// Derives a key from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// Deterministic for a given (password, salt) pair. The password is used as
/// its UTF-8 bytes, with no normalization.
pub fn derive_key(password: &str, salt: &Salt) -> CryptoResult<DerivedKey> {
    if password.is_empty() {
        return Err(CryptoError::KeyDerivation("password must not be empty".into()));
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
    let derived = DerivedKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}
