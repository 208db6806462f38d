//! Sender-side share password generation.

use rand::Rng;

/// Characters a generated password is drawn from.
pub const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_=+";

pub const DEFAULT_PASSWORD_LENGTH: usize = 24;

/// Generates a random password of `length` characters.
///
/// Each character is sampled uniformly from [`PASSWORD_ALPHABET`], without
/// the modulo bias of reducing a raw byte.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_requested_length() {
        assert_eq!(generate_password(DEFAULT_PASSWORD_LENGTH).len(), 24);
        assert_eq!(generate_password(0), "");
    }

    #[test]
    fn only_uses_alphabet() {
        let pw = generate_password(512);
        assert!(pw.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
    }

    #[test]
    fn passwords_differ() {
        assert_ne!(generate_password(24), generate_password(24));
    }
}
