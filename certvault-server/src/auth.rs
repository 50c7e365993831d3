//! Client-certificate identity for the server.
//!
//! rustls has already verified the peer chain against the root by the time a
//! request reaches the router. This layer only decides whether a
//! certificate is required and turns the leaf's common name into an
//! [`Owner`].

use std::sync::Arc;

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use certvault_core::common_name;
use certvault_core::sync::client::REGISTER_PATH;

use crate::error::ServerError;

/// Certificates the peer presented during the TLS handshake, leaf first.
/// Empty when the client sent none.
#[derive(Debug, Clone, Default)]
pub struct TlsPeer {
    chain: Arc<Vec<Vec<u8>>>,
}

impl TlsPeer {
    pub fn new(chain: Vec<Vec<u8>>) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }

    pub fn leaf(&self) -> Option<&[u8]> {
        self.chain.first().map(Vec::as_slice)
    }
}

/// The authenticated login, taken from the leaf certificate's common name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Owner>()
            .cloned()
            .ok_or_else(|| ServerError::Auth("client certificate required".to_string()))
    }
}

/// Require a client certificate on every path except enrollment.
pub async fn require_client_cert(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if request.uri().path() == REGISTER_PATH {
        return Ok(next.run(request).await);
    }

    let login = {
        let leaf = request
            .extensions()
            .get::<TlsPeer>()
            .and_then(TlsPeer::leaf)
            .ok_or_else(|| ServerError::Auth("client certificate required".to_string()))?;
        common_name(leaf).map_err(|e| {
            tracing::debug!(error = %e, "Rejected client certificate");
            ServerError::Auth("client certificate has no usable common name".to_string())
        })?
    };

    request.extensions_mut().insert(Owner(login));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{middleware, Router};
    use certvault_core::pki::{certificate_der, issue_root, Authority};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/api/register", post(|| async { "open" }))
            .route("/api/whoami", post(|owner: Owner| async move { owner.0 }))
            .layer(middleware::from_fn(require_client_cert))
    }

    fn request(path: &str, peer: Option<TlsPeer>) -> Request<Body> {
        let mut req = Request::post(path).body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            req.extensions_mut().insert(peer);
        }
        req
    }

    fn peer_for(login: &str) -> TlsPeer {
        let root = issue_root().unwrap();
        let ca = Authority::from_pem(&root.cert_pem, &root.key_pem).unwrap();
        let leaf = ca.issue_leaf(login).unwrap();
        TlsPeer::new(vec![certificate_der(&leaf.cert_pem).unwrap()])
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn missing_certificate_is_rejected() {
        let resp = app().oneshot(request("/api/whoami", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(resp).await.contains("client certificate required"));
    }

    #[tokio::test]
    async fn empty_chain_is_rejected() {
        let resp = app()
            .oneshot(request("/api/whoami", Some(TlsPeer::default())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn garbage_certificate_is_rejected() {
        let peer = TlsPeer::new(vec![b"not der".to_vec()]);
        let resp = app()
            .oneshot(request("/api/whoami", Some(peer)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn owner_is_leaf_common_name() {
        let resp = app()
            .oneshot(request("/api/whoami", Some(peer_for("carol"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "carol");
    }

    #[tokio::test]
    async fn enrollment_path_needs_no_certificate() {
        let resp = app().oneshot(request("/api/register", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "open");
    }
}
