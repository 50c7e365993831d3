//! certvault core library
//!
//! Shared by the server and the command-line client:
//! - identity authority (root bootstrap, leaf issuance, CN extraction)
//! - AES-256-GCM cache cipher keyed from the client's private key
//! - encrypted local secret cache
//! - sync wire models, HTTP client and auto-sync agent

pub mod cache;
pub mod crypto;
pub mod pki;
pub mod sync;

pub use cache::{CacheError, LocalCache, MergeOutcome, SecretView};
pub use crypto::{CacheCipher, CryptoError};
pub use pki::{common_name, issue_root, Authority, Credential, KeyAlgorithm, PkiError};
pub use sync::{
    AutoSync, ConflictResolver, Resolution, Secret, SecretKind, SyncClient, SyncError,
    SyncReport, SyncRequest, SyncResponse,
};
