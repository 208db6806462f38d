//! Text encoding for the short binary values (IV, salt) that travel inside
//! metadata records.
//!
//! Producers have used both the standard and the URL-safe base64 alphabet,
//! with and without padding, so [`decode`] accepts all four forms. Encoders
//! always emit padded output.

use crate::error::{CryptoError, CryptoResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;

/// Encodes bytes with the standard alphabet, padded.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Encodes bytes with the URL-safe alphabet, padded.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decodes standard or URL-safe base64, padded or not.
///
/// Surrounding whitespace is ignored. Rejected: inputs mixing both alphabets,
/// padding that is longer than two characters or doesn't end a 4-character
/// group, a dangling 6-bit group, and non-zero trailing bits.
pub fn decode(text: &str) -> CryptoResult<Vec<u8>> {
    let trimmed = text.trim();
    let unpadded = trimmed.trim_end_matches('=');

    // Padding is optional, but when present it must complete the last group.
    let padding = trimmed.len() - unpadded.len();
    if padding > 2 || (padding > 0 && trimmed.len() % 4 != 0) {
        return Err(CryptoError::Encoding(format!(
            "invalid base64 padding ({padding} '=' in {} characters)",
            trimmed.len()
        )));
    }

    let has_standard = unpadded.contains(['+', '/']);
    let has_url_safe = unpadded.contains(['-', '_']);
    if has_standard && has_url_safe {
        return Err(CryptoError::Encoding(
            "base64 input mixes standard and URL-safe alphabets".into(),
        ));
    }

    // A single leftover character carries only 6 bits and can't encode a byte.
    if unpadded.len() % 4 == 1 {
        return Err(CryptoError::Encoding(format!(
            "invalid base64 length {}",
            unpadded.len()
        )));
    }

    let mut normalized: String = unpadded
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| CryptoError::Encoding(format!("invalid base64: {e}")))
}

/// Decodes base64 text that must contain exactly `N` bytes.
///
/// `what` names the value in the error message ("iv", "salt").
pub fn decode_fixed<const N: usize>(text: &str, what: &str) -> CryptoResult<[u8; N]> {
    let bytes = decode(text)?;
    if bytes.len() != N {
        return Err(CryptoError::Encoding(format!(
            "invalid {what} length: expected {N} bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
