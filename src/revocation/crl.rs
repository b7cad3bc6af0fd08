//! Local Certificate Revocation List.
//!
//! Loaded once at startup from PEM (`X509 CRL` blocks) or raw DER and kept
//! immutable for the life of the process. Only serial numbers are retained;
//! there is no expiry or refresh.

use std::collections::HashSet;

use rustls::pki_types::CertificateRevocationListDer;
use rustls::pki_types::pem::PemObject;
use tracing::{debug, info};
use x509_parser::prelude::FromDer;
use x509_parser::revocation_list::CertificateRevocationList;

use super::normalize_serial;
use crate::mtls::PemSource;
use crate::{Error, Result};

/// Set of revoked serial numbers.
#[derive(Debug, Clone, Default)]
pub struct RevocationList {
    revoked: HashSet<Vec<u8>>,
}

impl RevocationList {
    /// Load a CRL, PEM or DER, from a file or inline base64.
    ///
    /// A PEM document may hold several CRLs; their entries are merged.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or any CRL in it is
    /// malformed.
    pub fn load(source: PemSource<'_>) -> Result<Self> {
        let data = source.read()?;
        let list = Self::from_bytes(&data)
            .map_err(|e| Error::Tls(format!("Failed to load CRL from {source}: {e}")))?;
        info!(source = %source, revoked = list.len(), "CRL loaded");
        Ok(list)
    }

    /// Parse PEM or DER CRL bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` on malformed input.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if looks_like_pem(data) {
            Self::from_pem(data)
        } else {
            Self::from_der(data)
        }
    }

    /// Parse one DER-encoded CRL.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` on malformed DER.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let mut list = Self::default();
        list.merge_der(der)?;
        Ok(list)
    }

    /// Parse every `X509 CRL` block of a PEM document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if a block is malformed or none is present.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let ders = CertificateRevocationListDer::pem_slice_iter(pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Tls(format!("invalid CRL PEM: {e}")))?;
        if ders.is_empty() {
            return Err(Error::Tls("no X509 CRL block found".to_string()));
        }

        let mut list = Self::default();
        for der in &ders {
            list.merge_der(der.as_ref())?;
        }
        Ok(list)
    }

    /// Build directly from serial numbers (big-endian bytes).
    pub fn from_serials<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            revoked: serials
                .into_iter()
                .map(|s| normalize_serial(s.as_ref()).to_vec())
                .collect(),
        }
    }

    fn merge_der(&mut self, der: &[u8]) -> Result<()> {
        let (_, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| Error::Tls(format!("invalid CRL: {e}")))?;
        let before = self.revoked.len();
        for entry in crl.iter_revoked_certificates() {
            self.revoked
                .insert(normalize_serial(entry.raw_serial()).to_vec());
        }
        debug!(
            issuer = %crl.issuer(),
            entries = self.revoked.len() - before,
            "CRL parsed"
        );
        Ok(())
    }

    /// Whether `serial` (big-endian bytes, sign padding allowed) is listed.
    #[must_use]
    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        self.revoked.contains(normalize_serial(serial))
    }

    /// Number of revoked serials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    /// Whether nothing is revoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

fn looks_like_pem(data: &[u8]) -> bool {
    data.iter()
        .position(|b| !b.is_ascii_whitespace())
        .is_some_and(|start| data[start..].starts_with(b"-----BEGIN"))
}
