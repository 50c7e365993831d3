//! Root certificate bootstrap and leaf issuance.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use rand::{rngs::OsRng, RngCore};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, PublicKeyData, SerialNumber,
};
use time::{Duration, OffsetDateTime};
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

use super::{certificate_der, KeyAlgorithm, KeyMaterial, PkiError, Result, ROOT_COMMON_NAME};

const ROOT_VALIDITY_DAYS: i64 = 3650;
const LEAF_VALIDITY_DAYS: i64 = 365;
/// Upper bound on the X.520 commonName attribute.
const MAX_COMMON_NAME_LEN: usize = 64;

/// A certificate and its private key, both PEM encoded.
#[derive(Clone)]
pub struct Credential {
    pub cert_pem: String,
    pub key_pem: Zeroizing<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl Credential {
    /// Write both PEMs. The key file is created with mode 0600 on unix.
    pub fn write_pem(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        for path in [cert_path, key_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
        }

        fs::write(cert_path, self.cert_pem.as_bytes()).map_err(|e| io_error(cert_path, e))?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(key_path).map_err(|e| io_error(key_path, e))?;
        file.write_all(self.key_pem.as_bytes())
            .map_err(|e| io_error(key_path, e))?;
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PkiError {
    PkiError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// 128 random bits, top bit cleared so the DER integer stays positive.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn subject(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn
}

fn validity(params: &mut CertificateParams, days: i64) {
    let now = OffsetDateTime::now_utc();
    // backdated for clock skew between client and server
    params.not_before = now - Duration::minutes(1);
    params.not_after = now + Duration::days(days);
}

/// Generate a fresh self-signed root: CA, 10 years, cert and CRL signing.
pub fn issue_root() -> Result<Credential> {
    let key = KeyMaterial::generate(KeyAlgorithm::default())?;

    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = subject(ROOT_COMMON_NAME);
    params.serial_number = Some(random_serial());
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    validity(&mut params, ROOT_VALIDITY_DAYS);

    let cert = params.self_signed(&key.pair)?;
    tracing::info!(algorithm = ?key.algorithm, "Issued root certificate");

    Ok(Credential {
        cert_pem: cert.pem(),
        key_pem: Zeroizing::new(key.pair.serialize_pem()),
    })
}

/// Signs leaf certificates with the root key.
///
/// Holds the root certificate and key in memory for the life of the
/// process; never keeps the leaf keys it generates.
pub struct Authority {
    ca_cert_pem: String,
    issuer: Issuer<'static, KeyPair>,
    algorithm: KeyAlgorithm,
    leaf_algorithm: KeyAlgorithm,
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("algorithm", &self.algorithm)
            .field("leaf_algorithm", &self.leaf_algorithm)
            .finish_non_exhaustive()
    }
}

impl Authority {
    /// Load the root from PEM files on disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = fs::read_to_string(cert_path).map_err(|e| io_error(cert_path, e))?;
        let key_pem =
            Zeroizing::new(fs::read_to_string(key_path).map_err(|e| io_error(key_path, e))?);
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Build an authority from in-memory PEMs.
    ///
    /// The certificate must be a CA and the key must be the one it certifies.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let der = certificate_der(cert_pem)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::InvalidCertificate(e.to_string()))?;
        if !cert.is_ca() {
            return Err(PkiError::InvalidCertificate(
                "root certificate is not a CA".to_string(),
            ));
        }

        let key = KeyMaterial::from_pem(key_pem)?;
        if cert.public_key().raw != key.pair.subject_public_key_info().as_slice() {
            return Err(PkiError::InvalidCertificate(
                "private key does not match root certificate".to_string(),
            ));
        }

        let algorithm = key.algorithm;
        let issuer = Issuer::from_ca_cert_pem(cert_pem, key.pair)?;

        Ok(Self {
            ca_cert_pem: cert_pem.to_string(),
            issuer,
            algorithm,
            leaf_algorithm: KeyAlgorithm::default(),
        })
    }

    /// Use a different key family for issued leaves.
    pub fn with_leaf_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.leaf_algorithm = algorithm;
        self
    }

    /// PEM of the root certificate, for clients that need to trust it.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Issue a client identity whose common name is `login`.
    pub fn issue_leaf(&self, login: &str) -> Result<Credential> {
        validate_common_name(login)?;
        self.issue(login, Vec::new())
    }

    /// Issue a server certificate for `host`, also listed as a subject
    /// alternative name so TLS clients can match it.
    pub fn issue_server_leaf(&self, host: &str) -> Result<Credential> {
        validate_common_name(host)?;
        self.issue(host, vec![host.to_string()])
    }

    fn issue(&self, common_name: &str, alt_names: Vec<String>) -> Result<Credential> {
        let key = KeyMaterial::generate(self.leaf_algorithm)?;

        let mut params = CertificateParams::new(alt_names)?;
        params.distinguished_name = subject(common_name);
        params.serial_number = Some(random_serial());
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        validity(&mut params, LEAF_VALIDITY_DAYS);

        let cert = params.signed_by(&key.pair, &self.issuer)?;
        tracing::debug!(common_name, "Issued leaf certificate");

        Ok(Credential {
            cert_pem: cert.pem(),
            key_pem: Zeroizing::new(key.pair.serialize_pem()),
        })
    }
}

fn validate_common_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PkiError::InvalidLogin("login must not be empty".to_string()));
    }
    if name.len() > MAX_COMMON_NAME_LEN {
        return Err(PkiError::InvalidLogin(format!(
            "login longer than {} bytes",
            MAX_COMMON_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(PkiError::InvalidLogin(
            "login contains control characters".to_string(),
        ));
    }
    Ok(())
}
