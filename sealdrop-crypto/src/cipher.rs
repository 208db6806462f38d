//! ChaCha20-Poly1305 file sealing.
//!
//! A sealed file is the raw AEAD output (ciphertext followed by the 16-byte
//! Poly1305 tag). IV and salt are carried separately as base64 text so the
//! server can store them as metadata next to the opaque blob.

use crate::encoding;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, Salt};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of the AEAD nonce (IV) in bytes. 16-byte IVs are rejected.
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Per-encryption AEAD nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Iv([u8; NONCE_SIZE]);

impl Iv {
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    pub fn from_base64(text: &str) -> CryptoResult<Self> {
        encoding::decode_fixed::<NONCE_SIZE>(text, "iv").map(Self)
    }
}

/// Output of [`encrypt_file`]: the ciphertext plus the values the recipient
/// needs (besides the password) to open it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedFile {
    #[serde(skip)]
    pub ciphertext: Vec<u8>,
    /// Base64 IV.
    pub iv: String,
    /// Base64 salt.
    pub salt: String,
}

impl SealedFile {
    /// Ciphertext length produced for a plaintext of `plaintext_len` bytes.
    pub const fn ciphertext_len_for(plaintext_len: u64) -> u64 {
        plaintext_len + TAG_SIZE as u64
    }
}

/// Encrypts `plaintext` under `key` with the given nonce.
pub fn seal(key: &DerivedKey, iv: &Iv, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(iv.as_bytes()), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypts and authenticates `ciphertext`. Tag verification is constant-time.
pub fn open(key: &DerivedKey, iv: &Iv, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv.as_bytes()), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

/// Encrypts a file for upload with a fresh salt and IV.
pub fn encrypt_file(plaintext: &[u8], password: &str) -> CryptoResult<SealedFile> {
    let salt = Salt::random();
    let iv = Iv::random();
    let key = derive_key(password, &salt)?;
    let ciphertext = seal(&key, &iv, plaintext)?;

    Ok(SealedFile {
        ciphertext,
        iv: iv.to_base64(),
        salt: salt.to_base64(),
    })
}

/// Decrypts a downloaded file using the IV and salt from its metadata.
///
/// Any authentication failure, whatever the cause, is reported as
/// [`CryptoError::Authentication`].
pub fn decrypt_file(
    ciphertext: &[u8],
    password: &str,
    iv_b64: &str,
    salt_b64: &str,
) -> CryptoResult<Vec<u8>> {
    let iv = Iv::from_base64(iv_b64)?;
    let salt = Salt::from_base64(salt_b64)?;
    if ciphertext.len() < TAG_SIZE {
        // Same cost as a tag failure.
        let _ = derive_key(password, &salt)?;
        return Err(CryptoError::Authentication);
    }
    let key = derive_key(password, &salt)?;
    open(&key, &iv, ciphertext)
}

/// Convenience wrapper over [`decrypt_file`] for a [`SealedFile`].
pub fn decrypt_sealed(sealed: &SealedFile, password: &str) -> CryptoResult<Vec<u8>> {
    decrypt_file(&sealed.ciphertext, password, &sealed.iv, &sealed.salt)
}
