//! AES-256-GCM sealing of cache payloads.
//!
//! Layout of a sealed payload is `nonce(12) || ciphertext || auth_tag(16)`.
//! A fresh random nonce is drawn for every call to [`CacheCipher::encrypt`].

use crate::crypto::kdf::{derive_cache_key, CacheKey};
use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypts and decrypts secret payloads with a key derived from the
/// client's private key.
#[derive(Clone)]
pub struct CacheCipher {
    key: CacheKey,
}

impl std::fmt::Debug for CacheCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCipher").finish_non_exhaustive()
    }
}

impl CacheCipher {
    pub fn new(key: CacheKey) -> Self {
        Self { key }
    }

    /// Build a cipher from PKCS#8 private key DER.
    pub fn from_private_key_der(der: &[u8]) -> Result<Self> {
        Ok(Self::new(derive_cache_key(der)?))
    }

    /// Build a cipher from a `PRIVATE KEY` PEM block.
    pub fn from_private_key_pem(pem: &str) -> Result<Self> {
        let der = crate::pki::private_key_der(pem)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::from_private_key_der(&der)
    }

    /// Seal `plaintext`. Empty input is allowed and yields a 28-byte blob.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(self.key.as_bytes().into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext_with_tag = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext_with_tag.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext_with_tag);
        Ok(sealed)
    }

    /// Open a sealed payload, verifying the tag.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::DecryptionFailed(format!(
                "payload too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce_bytes, ciphertext_with_tag) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(self.key.as_bytes().into());
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext_with_tag)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}
