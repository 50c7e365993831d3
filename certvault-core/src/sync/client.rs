//! HTTP sync client for the certvault server.
//!
//! Every request runs over TLS with the certvault root as the only trust
//! anchor. Authenticated calls present the user's leaf as the client
//! certificate; the server derives the owner from it.

use std::time::Duration;

use reqwest::{Certificate, Client, Identity, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::pki::Credential;
use crate::sync::models::{
    ErrorResponse, LoginResponse, RegisterRequest, RegisterResponse, SyncRequest, SyncResponse,
};
use crate::sync::{Result, SyncError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const REGISTER_PATH: &str = "/api/register";
pub const LOGIN_PATH: &str = "/api/login";
pub const SYNC_PATH: &str = "/api/sync";

/// HTTP client bound to one identity.
#[derive(Debug, Clone)]
pub struct SyncClient {
    client: Client,
    base_url: String,
}

fn builder(ca_pem: &str) -> Result<reqwest::ClientBuilder> {
    let ca = Certificate::from_pem(ca_pem.as_bytes())?;
    Ok(Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(ca)
        .timeout(REQUEST_TIMEOUT))
}

fn normalize(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

impl SyncClient {
    /// Build a client presenting `cert_pem`/`key_pem` and trusting only
    /// `ca_pem`.
    pub fn connect(base_url: &str, cert_pem: &str, key_pem: &str, ca_pem: &str) -> Result<Self> {
        let mut bundle = String::with_capacity(cert_pem.len() + key_pem.len() + 1);
        bundle.push_str(cert_pem);
        if !cert_pem.ends_with('\n') {
            bundle.push('\n');
        }
        bundle.push_str(key_pem);
        let identity = Identity::from_pem(bundle.as_bytes())?;

        let client = builder(ca_pem)?.identity(identity).build()?;
        Ok(Self {
            client,
            base_url: normalize(base_url),
        })
    }

    /// Enroll `login` and receive a fresh certificate and key.
    ///
    /// Sent without a client certificate. An existing login is reported as
    /// [`SyncError::Conflict`].
    pub async fn register(base_url: &str, login: &str, ca_pem: &str) -> Result<Credential> {
        let client = builder(ca_pem)?.build()?;
        let url = format!("{}{}", normalize(base_url), REGISTER_PATH);
        let body = RegisterRequest {
            login: login.to_string(),
        };
        let resp: RegisterResponse = post_json(&client, &url, &body).await?;
        tracing::info!(login, "Registered new identity");
        Ok(Credential {
            cert_pem: resp.cert,
            key_pem: resp.key.into(),
        })
    }

    /// Check that the server accepts this identity.
    pub async fn login(&self) -> Result<LoginResponse> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        post_json(&self.client, &url, &serde_json::json!({})).await
    }

    /// Push local secrets and pull everything the server holds that is
    /// newer than `request.versions`.
    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let url = format!("{}{}", self.base_url, SYNC_PATH);
        post_json(&self.client, &url, request).await
    }
}

async fn post_json<B, R>(client: &Client, url: &str, body: &B) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let resp = client.post(url).json(body).send().await?;

    let status = resp.status();
    if !status.is_success() {
        let message = match resp.json::<ErrorResponse>().await {
            Ok(err) => err.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        return Err(status_error(status, message));
    }

    resp.json::<R>()
        .await
        .map_err(|e| SyncError::InvalidResponse(e.to_string()))
}

fn status_error(status: StatusCode, message: String) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED => SyncError::Unauthorized(message),
        StatusCode::FORBIDDEN => SyncError::Forbidden(message),
        StatusCode::CONFLICT => SyncError::Conflict(message),
        _ => SyncError::Status {
            status: status.as_u16(),
            message,
        },
    }
}
