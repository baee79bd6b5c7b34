//! At-rest encryption for explorer API keys

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use thiserror::Error;

const FORMAT_VERSION: u8 = 0x01;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Base64 decode error: {0}")]
    Base64Decode(String),
    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(String),
}

/// Parse a 64-character hex string into an AES-256 cipher
fn cipher_from_hex(key_hex: &str) -> Result<Aes256Gcm, CryptoError> {
    let key_bytes = hex::decode(key_hex.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let key: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("Encryption key must be 32 bytes (256 bits)".to_string()))?;

    Ok(Aes256Gcm::new(&key.into()))
}

/// Check that `key_hex` is usable without encrypting anything
pub fn validate_key(key_hex: &str) -> Result<(), CryptoError> {
    cipher_from_hex(key_hex).map(|_| ())
}

/// Encrypt a secret; output is base64 of `[version][nonce(12)][ciphertext]`
pub fn encrypt_secret(secret: &str, key_hex: &str) -> Result<String, CryptoError> {
    let cipher = cipher_from_hex(key_hex)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt((&nonce_bytes).into(), secret.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(out))
}

/// Reverse of [`encrypt_secret`]
pub fn decrypt_secret(encrypted_b64: &str, key_hex: &str) -> Result<String, CryptoError> {
    let data = BASE64
        .decode(encrypted_b64)
        .map_err(|e| CryptoError::Base64Decode(e.to_string()))?;

    if data.len() < 1 + NONCE_LEN {
        return Err(CryptoError::InvalidData(
            "Encrypted data too short (need at least version + nonce)".to_string(),
        ));
    }

    if data[0] != FORMAT_VERSION {
        return Err(CryptoError::InvalidData(format!(
            "Unsupported encryption version: {}",
            data[0]
        )));
    }

    let cipher = cipher_from_hex(key_hex)?;
    let nonce: [u8; NONCE_LEN] = data[1..1 + NONCE_LEN]
        .try_into()
        .map_err(|_| CryptoError::InvalidData("Failed to extract nonce".to_string()))?;

    let plaintext = cipher
        .decrypt((&nonce).into(), &data[1 + NONCE_LEN..])
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| CryptoError::Utf8Error(e.to_string()))
}
