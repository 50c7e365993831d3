//! Identity authority: root CA bootstrap, leaf issuance and certificate
//! inspection.
//!
//! A user's identity is the common name of the leaf certificate the root
//! signed for them. There is no revocation and no intermediate CA.

mod authority;

pub use authority::{issue_root, Authority, Credential};

use rcgen::{KeyPair, SignatureAlgorithm};
use thiserror::Error;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

pub const ROOT_COMMON_NAME: &str = "certvault root CA";

/// Errors from certificate issuance and loading.
#[derive(Error, Debug)]
pub enum PkiError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed PEM: {0}")]
    MalformedPem(String),

    #[error("Unexpected PEM block: expected {expected}, found {found}")]
    UnexpectedBlock { expected: &'static str, found: String },

    #[error("Unsupported key algorithm")]
    UnsupportedAlgorithm,

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Certificate has no common name")]
    MissingCommonName,

    #[error("Invalid login: {0}")]
    InvalidLogin(String),

    #[error("Certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Supported key families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn signature_algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            Self::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }

    fn detect(pair: &KeyPair) -> Result<Self> {
        let alg = pair.algorithm();
        [Self::EcdsaP256, Self::EcdsaP384, Self::Ed25519]
            .into_iter()
            .find(|candidate| candidate.signature_algorithm() == alg)
            .ok_or(PkiError::UnsupportedAlgorithm)
    }
}

/// A PKCS#8 key pair tagged with its algorithm.
pub struct KeyMaterial {
    pub algorithm: KeyAlgorithm,
    pub pair: KeyPair,
}

impl KeyMaterial {
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let pair = KeyPair::generate_for(algorithm.signature_algorithm())?;
        Ok(Self { algorithm, pair })
    }

    /// Parse a `PRIVATE KEY` PEM block. Legacy `EC PRIVATE KEY` and
    /// `RSA PRIVATE KEY` blocks are rejected.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = private_key_der(pem)?;
        if der.is_empty() {
            return Err(PkiError::MalformedPem("empty private key".to_string()));
        }
        let pair = KeyPair::from_pem(pem)
            .map_err(|e| PkiError::MalformedPem(format!("private key: {}", e)))?;
        let algorithm = KeyAlgorithm::detect(&pair)?;
        Ok(Self { algorithm, pair })
    }
}

/// Decode the single PEM block in `pem`, checking its label.
fn decode_block(pem: &[u8], expected: &'static str) -> Result<Vec<u8>> {
    let (_, block) =
        parse_x509_pem(pem).map_err(|e| PkiError::MalformedPem(e.to_string()))?;
    if block.label != expected {
        return Err(PkiError::UnexpectedBlock {
            expected,
            found: block.label,
        });
    }
    Ok(block.contents)
}

/// PKCS#8 DER of a `PRIVATE KEY` PEM block.
pub fn private_key_der(pem: &str) -> Result<Zeroizing<Vec<u8>>> {
    decode_block(pem.as_bytes(), "PRIVATE KEY").map(Zeroizing::new)
}

/// DER of a `CERTIFICATE` PEM block.
pub fn certificate_der(pem: &str) -> Result<Vec<u8>> {
    decode_block(pem.as_bytes(), "CERTIFICATE")
}

/// Common name of a DER certificate.
pub fn common_name(cert_der: &[u8]) -> Result<String> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .ok_or(PkiError::MissingCommonName)?;
    let cn = cn
        .as_str()
        .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
    if cn.is_empty() {
        return Err(PkiError::MissingCommonName);
    }
    Ok(cn.to_string())
}
