//! HKDF-SHA256 derivation of the cache key.
//!
//! The input keying material is the client's PKCS#8 private key DER. The
//! certificate is public and never used here.

use crate::crypto::{CryptoError, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const CACHE_KEY_SALT: &[u8] = b"certvault-cache-salt-v1";
const CACHE_KEY_INFO: &[u8] = b"certvault-cache-aes256gcm-v1";

/// 256-bit key for the local cache. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CacheKey(<redacted>)")
    }
}

/// Derive the cache key from private key material.
pub fn derive_cache_key(private_key_der: &[u8]) -> Result<CacheKey> {
    if private_key_der.is_empty() {
        return Err(CryptoError::InvalidKey("empty private key".to_string()));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(CACHE_KEY_SALT), private_key_der);
    let mut key = [0u8; 32];
    hkdf.expand(CACHE_KEY_INFO, &mut key)
        .map_err(|e| CryptoError::KdfFailed(e.to_string()))?;
    Ok(CacheKey(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_cache_key(b"private key bytes").unwrap();
        let b = derive_cache_key(b"private key bytes").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_keys_differ() {
        let a = derive_cache_key(b"key one").unwrap();
        let b = derive_cache_key(b"key two").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn empty_input_rejected() {
        assert!(matches!(
            derive_cache_key(b""),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_does_not_leak() {
        let key = derive_cache_key(b"k").unwrap();
        assert_eq!(format!("{:?}", key), "CacheKey(<redacted>)");
    }
}
