//! Symmetric authenticated encryption for cookie payloads (ChaCha20-Poly1305).
//!
//! Output layout: base64url(nonce[12] || ciphertext+tag). Any tampering makes
//! `decrypt` fail; callers treat that exactly like a missing cookie.
use base64::{Engine as _, engine::general_purpose};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncryptError {
    #[error("encryption failed")]
    Encrypt,
    #[error("invalid ciphertext")]
    InvalidCiphertext,
    #[error("decryption failed")]
    Decrypt,
}

/// Accepts 64 hex chars, base64url/base64 of 32 bytes, or 32 raw bytes.
pub fn parse_key_material(raw: &str) -> Option<[u8; 32]> {
    let trimmed = raw.trim();

    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(trimmed).ok()?;
        return bytes.as_slice().try_into().ok();
    }

    if let Ok(bytes) = general_purpose::URL_SAFE_NO_PAD.decode(trimmed) {
        if bytes.len() == 32 {
            return bytes.as_slice().try_into().ok();
        }
    }

    if let Ok(bytes) = general_purpose::STANDARD.decode(trimmed) {
        if bytes.len() == 32 {
            return bytes.as_slice().try_into().ok();
        }
    }

    let raw_bytes = trimmed.as_bytes();
    if raw_bytes.len() == 32 {
        return raw_bytes.try_into().ok();
    }

    None
}

#[derive(Clone)]
pub struct Encrypt {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for Encrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("Encrypt").finish_non_exhaustive()
    }
}

impl Encrypt {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, EncryptError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EncryptError::Encrypt)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, EncryptError> {
        let payload = general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| EncryptError::InvalidCiphertext)?;

        if payload.len() <= NONCE_LEN {
            return Err(EncryptError::InvalidCiphertext);
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| EncryptError::Decrypt)
    }
}
