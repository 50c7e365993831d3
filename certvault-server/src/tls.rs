//! rustls server configuration: present the server leaf, verify client
//! certificates against the certvault root when one is offered.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

use crate::config::ServerConfig;

/// Load the server certificate, key and client root named in `config`.
pub fn load(config: &ServerConfig) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let chain = read_certs(&config.tls_cert_path)?;
    let key = PrivateKeyDer::from_pem_file(&config.tls_key_path)
        .with_context(|| format!("reading {}", config.tls_key_path.display()))?;
    let roots = read_certs(&config.ca_cert_path)?;
    build(chain, key, roots)
}

fn read_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .with_context(|| format!("reading {}", path.display()))?;
    anyhow::ensure!(!certs.is_empty(), "no certificates in {}", path.display());
    Ok(certs)
}

/// TLS 1.2+ with optional client authentication. Handshakes without a
/// client certificate succeed; the router decides which paths need one.
pub fn build(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    roots: Vec<CertificateDer<'static>>,
) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut store = RootCertStore::empty();
    for root in roots {
        store.add(root).context("adding client root")?;
    }

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(store), provider.clone())
        .allow_unauthenticated()
        .build()
        .context("building client verifier")?;

    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .context("loading server certificate")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use certvault_core::{issue_root, Authority};

    #[test]
    fn builds_from_issued_material() {
        let root = issue_root().unwrap();
        let ca = Authority::from_pem(&root.cert_pem, &root.key_pem).unwrap();
        let server = ca.issue_server_leaf("localhost").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            ca_cert_path: dir.path().join("ca.pem"),
            ca_key_path: dir.path().join("ca.key"),
            tls_cert_path: dir.path().join("server.pem"),
            tls_key_path: dir.path().join("server.key"),
            ..ServerConfig::default()
        };
        root.write_pem(&config.ca_cert_path, &config.ca_key_path)
            .unwrap();
        server
            .write_pem(&config.tls_cert_path, &config.tls_key_path)
            .unwrap();

        let tls = load(&config).unwrap();
        assert!(tls.alpn_protocols.contains(&b"http/1.1".to_vec()));
    }

    #[test]
    fn missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            tls_cert_path: dir.path().join("nope.pem"),
            ..ServerConfig::default()
        };
        assert!(load(&config).is_err());
    }
}
