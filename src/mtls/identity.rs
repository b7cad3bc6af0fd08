//! Client identity extraction.
//!
//! Parses the leaf of the verified peer chain and derives the numeric client
//! identity (subject Common Name) and the tenant (subject Locality).
//! Only the first value of each attribute counts; the serial is kept in
//! normalized big-endian form for CRL lookups.

use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::revocation::normalize_serial;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Why a verified chain could not be turned into a [`ClientIdentity`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The chain is empty.
    #[error("no client certificate presented")]
    NoCertificate,

    /// The leaf is not parseable DER.
    #[error("client certificate cannot be parsed: {0}")]
    Malformed(String),

    /// The Common Name is absent or not a base-10 signed 64-bit integer.
    #[error("certificate common name {0:?} is not a valid integer")]
    InvalidCommonName(Option<String>),

    /// Cloud routing needs a tenant but the Locality is absent.
    #[error("certificate has no locality (tenant) attribute")]
    MissingTenant,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity derived once per request from the transport-verified chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Numeric client id parsed from the Common Name.
    pub numeric_id: i64,

    /// Tenant identifier, the first Locality value of the subject.
    pub tenant_id: Option<String>,

    /// First Organisation value, reported in audit events.
    pub organization: Option<String>,

    /// RFC 4514 rendering of the subject DN, for logs.
    pub subject: String,

    /// Leaf serial, big-endian magnitude without leading zero bytes.
    pub serial: Vec<u8>,

    /// Verified chain, leaf first.
    pub chain: Arc<Vec<CertificateDer<'static>>>,
}

impl ClientIdentity {
    /// Build the identity from a verified chain (leaf first).
    ///
    /// `require_tenant` is set when cloud routing is enabled; only then is a
    /// missing Locality an error.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] when the chain is empty, the leaf cannot
    /// be parsed, its CN is not an integer, or a required tenant is absent.
    pub fn from_chain(
        chain: Arc<Vec<CertificateDer<'static>>>,
        require_tenant: bool,
    ) -> Result<Self, IdentityError> {
        let leaf = chain.first().ok_or(IdentityError::NoCertificate)?;
        let (_, cert) = X509Certificate::from_der(leaf.as_ref())
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;

        let common_name = extract_cn(&cert);
        let numeric_id = parse_numeric_id(common_name.as_deref())
            .ok_or(IdentityError::InvalidCommonName(common_name))?;

        let tenant_id = extract_locality(&cert);
        if require_tenant && tenant_id.is_none() {
            return Err(IdentityError::MissingTenant);
        }

        let organization = extract_organization(&cert);
        let subject = cert.subject().to_string();
        let serial = normalize_serial(cert.tbs_certificate.raw_serial()).to_vec();

        Ok(Self {
            numeric_id,
            tenant_id,
            organization,
            subject,
            serial,
            chain,
        })
    }

    /// Leaf serial as lowercase hex, for logs.
    #[must_use]
    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    /// The verified leaf certificate.
    #[must_use]
    pub fn leaf(&self) -> &CertificateDer<'static> {
        // from_chain rejects empty chains
        &self.chain[0]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a CN (or header) value as a base-10 signed 64-bit integer.
///
/// No trimming: a CN with whitespace is not an identity.
pub(crate) fn parse_numeric_id(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.parse::<i64>().ok())
}

/// Extract the CN attribute from the subject DN.
fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// Extract the first L attribute from the subject DN.
fn extract_locality(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_locality()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
        .filter(|l| !l.is_empty())
}

/// Extract the first O attribute from the subject DN.
fn extract_organization(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_organization()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
