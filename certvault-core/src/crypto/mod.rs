//! Cryptographic primitives for the local cache.
//!
//! This module provides:
//! - HKDF-SHA256 derivation of the cache key from the client's private key
//! - AES-256-GCM sealing of secret payloads

pub mod cipher;
pub mod kdf;

pub use cipher::CacheCipher;
pub use kdf::{derive_cache_key, CacheKey};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
