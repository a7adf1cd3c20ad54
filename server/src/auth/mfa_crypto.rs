//! 2FA Secret Sealing
//!
//! TOTP secrets are stored AES-256-GCM encrypted as hex
//! `nonce(12) || ciphertext || tag(16)`. Pending signups hold the plain
//! secret only in the ephemeral store, never in the database.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use thiserror::Error;

use super::error::AuthError;

const NONCE_LEN: usize = 12;

/// Sealing errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid encryption key length (expected 32 bytes, got {0})")]
    InvalidKeyLength(usize),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid sealed data format")]
    InvalidFormat,

    #[error("Hex decoding failed: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl From<CryptoError> for AuthError {
    fn from(e: CryptoError) -> Self {
        Self::Internal(format!("2FA secret sealing: {e}"))
    }
}

/// AES-256-GCM cipher for 2FA secrets at rest.
#[derive(Clone)]
pub struct SecretSealer {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretSealer(..)")
    }
}

impl SecretSealer {
    /// Build from raw key bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        })
    }

    /// Build from the hex key in `MFA_ENCRYPTION_KEY`.
    pub fn from_hex(key_hex: &str) -> Result<Self, CryptoError> {
        Self::new(&hex::decode(key_hex.trim())?)
    }

    /// Encrypt a base32 TOTP secret for storage.
    pub fn seal(&self, secret: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(hex::encode(combined))
    }

    /// Decrypt a stored secret.
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let combined = hex::decode(sealed)?;
        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::InvalidFormat);
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidFormat)
    }
}
