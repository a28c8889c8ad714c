//! Inline (encrypted) resource data on rich notifications.
//!
//! The payload is `base64(nonce || AES-256-GCM ciphertext)` of the message
//! JSON. `dataSignature` is `base64(HMAC-SHA256(data))` under the same
//! symmetric key, and `dataKey` is that key wrapped for the subscription's
//! certificate. Unwrapping is left to a [`ContentKeyResolver`].

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bridge_core::{ContentKeyResolver, EncryptedContent, Message};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{HandlerError, Result};

type HmacSha256 = Hmac<Sha256>;

const NONCE_SIZE: usize = 12;

fn decrypt_error(message: impl Into<String>) -> HandlerError {
    HandlerError::Decrypt(message.into())
}

/// Verify and open `content` with an already unwrapped key.
pub fn open_content(key: &[u8], content: &EncryptedContent) -> Result<Message> {
    let data = STANDARD
        .decode(&content.data)
        .map_err(|e| decrypt_error(format!("data is not base64: {e}")))?;
    let signature = STANDARD
        .decode(&content.data_signature)
        .map_err(|e| decrypt_error(format!("signature is not base64: {e}")))?;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| decrypt_error("invalid signing key"))?;
    mac.update(&data);
    mac.verify_slice(&signature)
        .map_err(|_| decrypt_error("signature mismatch"))?;

    if data.len() < NONCE_SIZE {
        return Err(decrypt_error("data too short"));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

    let cipher = <Aes256Gcm as KeyInit>::new_from_slice(key)
        .map_err(|_| decrypt_error("invalid content key"))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| decrypt_error("cipher rejected the data"))?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| decrypt_error(format!("unable to decode message: {e}")))
}

/// Unwrap the key of `content` with `resolver`, then open it.
pub fn decrypt_content(
    resolver: &dyn ContentKeyResolver,
    content: &EncryptedContent,
) -> Result<Message> {
    let wrapped = STANDARD
        .decode(&content.data_key)
        .map_err(|e| decrypt_error(format!("data key is not base64: {e}")))?;
    let key = resolver
        .unwrap_data_key(&content.encryption_certificate_id, &wrapped)
        .map_err(decrypt_error)?;
    open_content(&key, content)
}

/// Seal `message` the way Graph does for rich notifications.
///
/// `wrapped_key` is carried as `dataKey` verbatim.
pub fn seal_content(
    key: &[u8],
    wrapped_key: &[u8],
    certificate_id: &str,
    message: &Message,
) -> Result<EncryptedContent> {
    let plaintext = serde_json::to_vec(message)
        .map_err(|e| decrypt_error(format!("unable to encode message: {e}")))?;

    let cipher = <Aes256Gcm as KeyInit>::new_from_slice(key)
        .map_err(|_| decrypt_error("invalid content key"))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|_| decrypt_error("unable to seal content"))?;

    let mut data = nonce.to_vec();
    data.extend_from_slice(&ciphertext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| decrypt_error("invalid signing key"))?;
    mac.update(&data);
    let signature = mac.finalize().into_bytes();

    Ok(EncryptedContent {
        data: STANDARD.encode(&data),
        data_key: STANDARD.encode(wrapped_key),
        data_signature: STANDARD.encode(signature),
        encryption_certificate_id: certificate_id.to_string(),
    })
}
