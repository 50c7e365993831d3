//! Client/server synchronization.
//!
//! - Wire models shared by the server and its clients
//! - Last-write-wins version comparison
//! - reqwest client speaking mutual TLS to the server
//! - Periodic auto-sync of the local cache

pub mod agent;
pub mod client;
pub mod conflict;
pub mod models;

pub use agent::{AutoSync, SyncReport, DEFAULT_SYNC_INTERVAL};
pub use client::SyncClient;
pub use conflict::{ConflictResolver, Resolution};
pub use models::{
    ErrorResponse, LoginResponse, RegisterRequest, RegisterResponse, Secret, SecretKind,
    SyncRequest, SyncResponse,
};

use thiserror::Error;

/// Errors from talking to the server.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
