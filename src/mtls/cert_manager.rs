//! Certificate management: PEM loading and rustls config building.
//!
//! Provides:
//! - [`build_tls_config`]: build a `rustls::ServerConfig` from [`TlsConfig`]
//! - [`load_certs`] / [`load_private_key`]: PEM loading from a [`PemSource`]
//!
//! # File format
//!
//! Certificates and keys are expected in **PEM format**, whether read from a
//! file or decoded from inline base64. Only the CRL (see
//! [`crate::revocation::crl`]) also accepts raw DER.

use std::fmt::Display;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tracing::debug;

use crate::mtls::config::{PemSource, TlsConfig};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build a `rustls::ServerConfig` for mutual TLS from the gateway config.
///
/// Clients without a valid certificate chaining to `ca_certs` are rejected
/// at the handshake. The CRL is intentionally not installed here; revoked
/// clients complete the handshake and receive a catalogued 403 instead.
///
/// # Errors
///
/// Returns an error if the server certificate or key cannot be read or
/// parsed, or if the rustls config cannot be built (e.g. mismatched
/// cert/key pair).
pub fn build_tls_config(
    config: &TlsConfig,
    ca_certs: &[CertificateDer<'static>],
) -> Result<ServerConfig> {
    let cert_source = config.server_cert_source()?;
    let server_certs = load_certs(cert_source)?;
    let server_key = load_private_key(config.server_key_source()?)?;

    let mut root_store = rustls::RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert.clone())
            .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
    }

    // Pin the provider; reqwest may link a second one into the process
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), Arc::clone(&provider))
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build client verifier: {e}")))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("Unsupported protocol versions: {e}")))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %cert_source,
        trust_anchors = ca_certs.len(),
        "mTLS config built"
    );

    Ok(tls_cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM source.
///
/// # Errors
///
/// Returns an error if the source cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(source: PemSource<'_>) -> Result<Vec<CertificateDer<'static>>> {
    parse_certs(&source.read()?, source)
}

/// Parse every certificate block of an already-read PEM document.
///
/// # Errors
///
/// Returns `Error::Tls` for malformed PEM or a document without certificates.
pub fn parse_certs(pem: &[u8], origin: impl Display) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs from {origin}: {e}")))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in {origin}")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM source.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
///
/// # Errors
///
/// Returns an error if the source cannot be read, contains no private key,
/// or the key format is unsupported.
pub fn load_private_key(source: PemSource<'_>) -> Result<PrivateKeyDer<'static>> {
    let pem_data = source.read()?;
    PrivateKeyDer::from_pem_slice(&pem_data)
        .map_err(|e| Error::Tls(format!("Failed to parse private key from {source}: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
