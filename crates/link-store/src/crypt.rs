//! Sealing of OAuth tokens at rest.
//!
//! A token is serialized to JSON, sealed with AES-GCM under the process-wide
//! key and stored as URL-safe base64 of `nonce || ciphertext`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use thiserror::Error;

/// Size of the AES-GCM nonce prepended to every sealed token.
pub const NONCE_SIZE: usize = 12;

/// Errors from sealing or opening a token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptError {
    /// The key is not a valid AES key length.
    #[error("could not create a cipher block, check key")]
    InvalidKey,

    /// The decoded input is shorter than the nonce.
    #[error("token too short")]
    TooShort,

    /// Authentication failed: wrong key or tampered data.
    #[error("cipher block rejected the token, check key")]
    Open,

    /// Sealing failed.
    #[error("could not seal token")]
    Seal,

    /// The stored value is not valid base64.
    #[error("invalid token encoding: {0}")]
    Encoding(String),
}

#[derive(Clone)]
enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// AES-GCM sealer for stored tokens.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Cipher,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher")
    }
}

impl TokenCipher {
    /// Build a cipher from a 16-byte (AES-128) or 32-byte (AES-256) key.
    pub fn new(key: &[u8]) -> Result<Self, CryptError> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|_| CryptError::InvalidKey)?,
            )),
            32 => Cipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| CryptError::InvalidKey)?,
            )),
            _ => return Err(CryptError::InvalidKey),
        };
        Ok(Self { cipher })
    }

    /// Seal `plain` and return the encoded `nonce || ciphertext`.
    pub fn encrypt(&self, plain: &str) -> Result<String, CryptError> {
        let (nonce, sealed) = match &self.cipher {
            Cipher::Aes128(c) => {
                let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
                let sealed = c
                    .encrypt(&nonce, plain.as_bytes())
                    .map_err(|_| CryptError::Seal)?;
                (nonce.to_vec(), sealed)
            }
            Cipher::Aes256(c) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let sealed = c
                    .encrypt(&nonce, plain.as_bytes())
                    .map_err(|_| CryptError::Seal)?;
                (nonce.to_vec(), sealed)
            }
        };

        let mut out = nonce;
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE.encode(out))
    }

    /// Open a value produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptError> {
        let decoded = URL_SAFE
            .decode(encoded)
            .map_err(|e| CryptError::Encoding(e.to_string()))?;

        if decoded.len() < NONCE_SIZE {
            return Err(CryptError::TooShort);
        }

        let (nonce, sealed) = decoded.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce);
        let plain = match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, sealed),
            Cipher::Aes256(c) => c.decrypt(nonce, sealed),
        }
        .map_err(|_| CryptError::Open)?;

        String::from_utf8(plain).map_err(|e| CryptError::Encoding(e.to_string()))
    }
}

/// Convenience wrapper: seal with a raw key.
pub fn encrypt(key: &[u8], plain: &str) -> Result<String, CryptError> {
    TokenCipher::new(key)?.encrypt(plain)
}

/// Convenience wrapper: open with a raw key.
pub fn decrypt(key: &[u8], encoded: &str) -> Result<String, CryptError> {
    TokenCipher::new(key)?.decrypt(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef";

    #[test]
    fn test_round_trip() {
        let sealed = encrypt(KEY, r#"{"access_token":"abc"}"#).unwrap();
        assert_ne!(sealed, r#"{"access_token":"abc"}"#);
        assert_eq!(decrypt(KEY, &sealed).unwrap(), r#"{"access_token":"abc"}"#);
    }

    #[test]
    fn test_nonce_is_random() {
        let a = encrypt(KEY, "same").unwrap();
        let b = encrypt(KEY, "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_aes256_key() {
        let key = [7u8; 32];
        let sealed = encrypt(&key, "token").unwrap();
        assert_eq!(decrypt(&key, &sealed).unwrap(), "token");
    }

    #[test]
    fn test_invalid_key_length() {
        let err = encrypt(b"short", "token").unwrap_err();
        assert_eq!(err, CryptError::InvalidKey);
        assert!(err.to_string().contains("cipher block"));
    }

    #[test]
    fn test_wrong_key() {
        let sealed = encrypt(KEY, "token").unwrap();
        let err = decrypt(b"fedcba9876543210", &sealed).unwrap_err();
        assert_eq!(err, CryptError::Open);
        assert!(err.to_string().contains("cipher block"));
    }

    #[test]
    fn test_too_short() {
        let encoded = URL_SAFE.encode([1u8; 4]);
        let err = decrypt(KEY, &encoded).unwrap_err();
        assert_eq!(err.to_string(), "token too short");
    }

    #[test]
    fn test_bad_encoding() {
        assert!(matches!(
            decrypt(KEY, "not base64!!"),
            Err(CryptError::Encoding(_))
        ));
    }
}
