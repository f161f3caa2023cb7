#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! Server identity: certificate chain and private key
//!
//! Identity is loaded once when the server role starts. Any failure is reported as
//! [`TlsError::IdentityUnavailable`], which aborts startup.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use tracing::{debug, info};

use crate::error::{ErrorCode, TlsError};

/// Certificate chain and matching private key
pub struct ServerIdentity {
    /// End-entity certificate first, then intermediates
    pub certificate_chain: Vec<CertificateDer<'static>>,
    /// Private key for the end-entity certificate
    pub private_key: PrivateKeyDer<'static>,
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("certificates", &self.certificate_chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Source of the server's identity
pub trait IdentityProvider {
    /// Load the certificate chain and private key
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::IdentityUnavailable`] if the material is missing or unreadable.
    fn load_identity(&self) -> Result<ServerIdentity, TlsError>;
}

/// Identity read from a PEM certificate file and a PEM private key file
#[derive(Debug, Clone)]
pub struct PemFileIdentity {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl PemFileIdentity {
    /// Identity backed by the given files
    #[must_use]
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self { cert_path: cert_path.into(), key_path: key_path.into() }
    }

    /// Certificate file path
    #[must_use]
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Private key file path
    #[must_use]
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl IdentityProvider for PemFileIdentity {
    fn load_identity(&self) -> Result<ServerIdentity, TlsError> {
        let certificate_chain = load_certificates(&self.cert_path)?;
        let private_key = load_private_key(&self.key_path)?;
        info!(
            cert = %self.cert_path.display(),
            certificates = certificate_chain.len(),
            "Loaded server identity"
        );
        Ok(ServerIdentity { certificate_chain, private_key })
    }
}

/// Load certificates from a PEM file
///
/// # Errors
///
/// Returns [`TlsError::IdentityUnavailable`] if:
/// - The certificate file cannot be opened or read
/// - The PEM data cannot be parsed as valid certificates
/// - No certificates are found in the file
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| {
        TlsError::identity_unavailable(
            format!("Failed to open certificate file '{}': {}", display, e),
            Some(&display),
            ErrorCode::MissingCertificate,
        )
    })?;
    let mut reader = BufReader::new(file);

    let certs: Vec<_> = CertificateDer::pem_reader_iter(&mut reader)
        .map(|cert| {
            cert.map_err(|e| {
                TlsError::identity_unavailable(
                    format!("Failed to parse certificate in '{}': {}", display, e),
                    Some(&display),
                    ErrorCode::CertificateParseError,
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        return Err(TlsError::identity_unavailable(
            format!("No valid certificates found in file '{}'", display),
            Some(&display),
            ErrorCode::MissingCertificate,
        ));
    }

    debug!(path = %path.display(), count = certs.len(), "Parsed certificates");
    Ok(certs)
}

/// Load a private key (PKCS#1, PKCS#8 or SEC1) from a PEM file
///
/// # Errors
///
/// Returns [`TlsError::IdentityUnavailable`] if the file cannot be opened or holds no
/// parseable private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| {
        TlsError::identity_unavailable(
            format!("Failed to open private key file '{}': {}", display, e),
            Some(&display),
            ErrorCode::MissingPrivateKey,
        )
    })?;
    let mut reader = BufReader::new(file);

    PrivateKeyDer::from_pem_reader(&mut reader).map_err(|e| {
        TlsError::identity_unavailable(
            format!("Failed to parse private key in '{}': {}", display, e),
            Some(&display),
            ErrorCode::MissingPrivateKey,
        )
    })
}
