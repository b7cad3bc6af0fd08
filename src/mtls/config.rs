//! TLS and revocation configuration types.
//!
//! Every PEM input comes either from a file or inline as base64 of the PEM
//! text (`*_pem_base64`); the inline form wins when both are set.
//!
//! # Example YAML
//!
//! ```yaml
//! tls:
//!   server_cert: "/etc/artifact-gate/tls/server.crt"
//!   server_key:  "/etc/artifact-gate/tls/server.key"
//!   ca_cert:     "/etc/artifact-gate/tls/ca.crt"
//!   crl_path:    "/etc/artifact-gate/tls/ca.crl"
//!   ocsp_url:    "http://ocsp.example.com:2560"
//!   ocsp_timeout: 5s
//! ```
//!
//! or, e.g. from a secret store:
//!
//! ```text
//! ARTIFACT_GATE_TLS__CA_CERT_PEM_BASE64=LS0tLS1CRUdJTi...
//! ```

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::config::humantime_serde;
use crate::{Error, Result};

/// Where one PEM document comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemSource<'a> {
    /// Base64 of the PEM text, inline in the configuration
    Inline {
        /// Configuration key, for error messages
        name: &'static str,
        /// Base64 payload
        base64: &'a str,
    },
    /// File on disk
    File(&'a str),
}

impl PemSource<'_> {
    /// Raw document bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid base64 and `Error::Tls` for an
    /// unreadable file.
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::Inline { name, base64 } => {
                let compact: String = base64.split_whitespace().collect();
                STANDARD
                    .decode(compact)
                    .map_err(|e| Error::Config(format!("{name} is not valid base64: {e}")))
            }
            Self::File(path) => std::fs::read(path)
                .map_err(|e| Error::Tls(format!("Cannot read '{path}': {e}"))),
        }
    }
}

impl fmt::Display for PemSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { name, .. } => write!(f, "{name}"),
            Self::File(path) => write!(f, "'{path}'"),
        }
    }
}

fn pem_source<'a>(
    name: &'static str,
    base64: Option<&'a str>,
    path: &'a str,
) -> Option<PemSource<'a>> {
    match base64.map(str::trim) {
        Some(base64) if !base64.is_empty() => Some(PemSource::Inline { name, base64 }),
        _ if !path.trim().is_empty() => Some(PemSource::File(path)),
        _ => None,
    }
}

/// Listener certificates, client trust store and revocation sources.
///
/// Client certificates are always required; there is no plain-TCP mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to the PEM-encoded server certificate chain.
    pub server_cert: String,

    /// Inline alternative to `server_cert`.
    pub server_cert_pem_base64: Option<String>,

    /// Path to the PEM-encoded server private key.
    pub server_key: String,

    /// Inline alternative to `server_key`.
    pub server_key_pem_base64: Option<String>,

    /// Path to the PEM-encoded CA bundle used to verify client certs.
    ///
    /// The same bundle is the only source of the OCSP issuer.
    pub ca_cert: String,

    /// Inline alternative to `ca_cert`.
    pub ca_cert_pem_base64: Option<String>,

    /// Optional Certificate Revocation List, PEM or DER.
    ///
    /// Checked per request after the handshake, never by rustls itself.
    pub crl_path: Option<String>,

    /// Inline alternative to `crl_path`.
    pub crl_pem_base64: Option<String>,

    /// Optional OCSP responder. When unset the OCSP stage is skipped.
    pub ocsp_url: Option<String>,

    /// Whole round-trip budget for one OCSP query.
    #[serde(with = "humantime_serde")]
    pub ocsp_timeout: Duration,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            server_cert: String::new(),
            server_cert_pem_base64: None,
            server_key: String::new(),
            server_key_pem_base64: None,
            ca_cert: String::new(),
            ca_cert_pem_base64: None,
            crl_path: None,
            crl_pem_base64: None,
            ocsp_url: None,
            ocsp_timeout: Duration::from_secs(5),
        }
    }
}

impl TlsConfig {
    /// Server certificate chain source.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when neither form is set.
    pub fn server_cert_source(&self) -> Result<PemSource<'_>> {
        required(
            "tls.server_cert",
            pem_source(
                "tls.server_cert_pem_base64",
                self.server_cert_pem_base64.as_deref(),
                &self.server_cert,
            ),
        )
    }

    /// Server private key source.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when neither form is set.
    pub fn server_key_source(&self) -> Result<PemSource<'_>> {
        required(
            "tls.server_key",
            pem_source(
                "tls.server_key_pem_base64",
                self.server_key_pem_base64.as_deref(),
                &self.server_key,
            ),
        )
    }

    /// Client CA bundle source.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when neither form is set.
    pub fn ca_cert_source(&self) -> Result<PemSource<'_>> {
        required(
            "tls.ca_cert",
            pem_source(
                "tls.ca_cert_pem_base64",
                self.ca_cert_pem_base64.as_deref(),
                &self.ca_cert,
            ),
        )
    }

    /// CRL source, if one is configured.
    #[must_use]
    pub fn crl_source(&self) -> Option<PemSource<'_>> {
        pem_source(
            "tls.crl_pem_base64",
            self.crl_pem_base64.as_deref(),
            self.crl_path.as_deref().unwrap_or_default(),
        )
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.server_cert_source()?;
        self.server_key_source()?;
        self.ca_cert_source()?;

        if let Some(url) = &self.ocsp_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| Error::Config(format!("tls.ocsp_url '{url}' is invalid: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "tls.ocsp_url '{url}' must use http or https"
                )));
            }
        }

        if self.ocsp_timeout.is_zero() {
            return Err(Error::Config("tls.ocsp_timeout must be positive".to_string()));
        }

        Ok(())
    }
}

fn required<'a>(name: &str, source: Option<PemSource<'a>>) -> Result<PemSource<'a>> {
    source.ok_or_else(|| Error::Config(format!("{name} or {name}_pem_base64 must be set")))
}
