#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

//! TLS 1.3 configuration for the resumption channel
//!
//! Both sides run TLS 1.3 only on the AWS-LC provider. Rustls's built-in resumption is
//! switched off on both sides (no client session cache, no server session storage, no
//! tickets) so that every resumption decision goes through the
//! [`HandshakeCoordinator`](crate::handshake::HandshakeCoordinator).

use std::path::Path;
use std::sync::Arc;

use rustls::client::Resumption;
use rustls::server::NoServerSessionStorage;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::TlsConfig;
use crate::error::{ErrorCode, TlsError};
use crate::identity::{ServerIdentity, load_certificates};

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn protocol_error(e: rustls::Error) -> TlsError {
    TlsError::Config {
        message: e.to_string(),
        field: Some("protocol_versions".to_string()),
        code: ErrorCode::InvalidProtocolVersion,
        context: Box::new(crate::error::ErrorContext::new(
            ErrorCode::InvalidProtocolVersion,
            crate::error::ErrorSeverity::Critical,
            crate::error::OperationPhase::Initialization,
        )),
        recovery: Box::new(crate::error::RecoveryHint::NoRecovery),
    }
}

/// Load system root certificates into the provided store
///
/// # Errors
/// Returns an error if no root certificates could be loaded, as this would
/// prevent any server certificate from validating.
fn load_system_root_certs(root_store: &mut RootCertStore) -> Result<(), TlsError> {
    let cert_result = rustls_native_certs::load_native_certs();

    for error in &cert_result.errors {
        tracing::warn!("Error loading some native root certificates: {}", error);
    }

    let mut loaded_count = 0usize;
    for cert in cert_result.certs {
        if root_store.add(cert).is_ok() {
            loaded_count = loaded_count.saturating_add(1);
        }
    }
    tracing::info!("Loaded {} root certificates from system store", loaded_count);

    if root_store.is_empty() {
        tracing::error!("No root certificates could be loaded from the system");
        return Err(TlsError::config(
            "No root certificates available",
            "ca_certs",
            "Pass a CA file with --ca or install system root certificates",
        ));
    }

    Ok(())
}

fn load_ca_file(root_store: &mut RootCertStore, path: &str) -> Result<(), TlsError> {
    let certs = load_certificates(Path::new(path)).map_err(|e| {
        TlsError::config(e.to_string(), "ca_certs", "Point ca_certs at a PEM CA bundle")
    })?;
    for cert in certs {
        root_store.add(cert).map_err(|e| {
            TlsError::config(
                format!("CA certificate in '{}' rejected: {}", path, e),
                "ca_certs",
                "Use a valid X.509 CA certificate",
            )
        })?;
    }
    tracing::info!(path, anchors = root_store.len(), "Loaded trust anchors from CA file");
    Ok(())
}

/// Create the client configuration
///
/// Trust anchors come from `config.ca_certs` when set, otherwise from the system store.
///
/// # Errors
///
/// Returns [`TlsError::Config`] if no trust anchors could be loaded or TLS 1.3 is not
/// available from the provider.
pub fn create_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
    let mut root_store = RootCertStore::empty();
    match &config.ca_certs {
        Some(path) => load_ca_file(&mut root_store, path)?,
        None => load_system_root_certs(&mut root_store)?,
    }

    let mut client_config = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(protocol_error)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    client_config.resumption = Resumption::disabled();

    Ok(client_config)
}

/// Create the server configuration from a loaded identity
///
/// # Errors
///
/// Returns [`TlsError::IdentityUnavailable`] if the certificate chain and private key
/// are rejected (for example, the key does not match the certificate).
pub fn create_server_config(identity: ServerIdentity) -> Result<ServerConfig, TlsError> {
    let mut server_config = ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(protocol_error)?
        .with_no_client_auth()
        .with_single_cert(identity.certificate_chain, identity.private_key)
        .map_err(|e| {
            TlsError::identity_unavailable(
                format!("Certificate and key rejected: {}", e),
                None,
                ErrorCode::CertificateInvalid,
            )
        })?;

    server_config.session_storage = Arc::new(NoServerSessionStorage {});
    server_config.send_tls13_tickets = 0;

    Ok(server_config)
}
