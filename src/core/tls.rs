// src/core/tls.rs

//! TLS plumbing shared by the cluster links and `tls://` resources.

use crate::core::ClusterError;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector, rustls};
use tracing::info;

/// Builds the head's acceptor from a PEM certificate chain and private key.
pub fn build_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, ClusterError> {
    install_crypto_provider();
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ClusterError::Internal(format!("Invalid TLS certificate or key: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Builds a client connector trusting the web PKI roots plus, optionally, the
/// certificates in `extra_roots` (a PEM file).
pub fn build_connector(extra_roots: Option<&str>) -> Result<TlsConnector, ClusterError> {
    install_crypto_provider();
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = extra_roots {
        let (added, ignored) = root_cert_store.add_parsable_certificates(load_certs(path)?);
        info!("Loaded {added} extra TLS root(s) from '{path}' ({ignored} ignored).");
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(tls_config)))
}

// Both ring (pulled in by reqwest) and aws-lc-rs are linked, so rustls cannot pick
// the process-wide provider by itself. The first caller installs aws-lc-rs.
fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Converts a host into the name checked against the server certificate.
pub fn server_name(host: &str) -> Result<rustls::pki_types::ServerName<'static>, ClusterError> {
    rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| ClusterError::InvalidResourceIdentifier(format!("Invalid TLS domain name '{host}'")))
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ClusterError> {
    let cert_file = File::open(path).map_err(|e| {
        ClusterError::Internal(format!("Failed to open certificate file '{path}': {e}"))
    })?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ClusterError::Internal(format!(
            "No certificates found in '{path}'"
        )));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ClusterError> {
    let key_file = File::open(path).map_err(|e| {
        ClusterError::Internal(format!("Failed to open private key file '{path}': {e}"))
    })?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| ClusterError::Internal(format!("No private key found in key file '{path}'")))
}
