//! Cipher engine for SealDrop.
//!
//! Files are encrypted on the sender's machine and only ciphertext is
//! uploaded. The recipient re-derives the key from a password shared
//! out-of-band:
//! - PBKDF2-HMAC-SHA256 (100 000 rounds, 16-byte salt) for key derivation
//! - ChaCha20-Poly1305 (12-byte IV, 16-byte tag) for authenticated encryption
//! - Base64 text for the IV and salt stored next to the ciphertext
//!
//! # Wire format
//!
//! These parameters are not transmitted with the file; they are pinned as
//! [`FORMAT_VERSION`] 1 and shared by every producer and consumer. Any change
//! to them requires a new version.
//!
//! Nothing in this crate logs, stores, or returns a password or derived key.

mod cipher;
pub mod encoding;
mod error;
mod key;
pub mod password;

pub use cipher::{
    decrypt_file, decrypt_sealed, encrypt_file, open, seal, Iv, SealedFile, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, DerivedKey, Salt, KEY_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};
pub use password::generate_password;

/// Version of the implicit wire format (KDF, AEAD, IV and salt sizes).
pub const FORMAT_VERSION: u8 = 1;
