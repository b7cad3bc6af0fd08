//! Certificate revocation checks.
//!
//! Two independent sources with different failure semantics:
//!
//! - [`crl`]: a local revocation list loaded once at startup. A lookup can
//!   only answer revoked or not revoked.
//! - [`ocsp`]: a live responder query per request. Anything short of a
//!   verified answer is [`RevocationOutcome::Indeterminate`], which callers
//!   must keep apart from a confirmed revocation.

pub mod crl;
pub mod ocsp;

pub use crl::RevocationList;
pub use ocsp::{OcspClient, OcspError};

/// Result of one revocation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationOutcome {
    /// The source vouches for the certificate.
    NotRevoked,
    /// The source reports the certificate as revoked (or not good).
    Revoked,
    /// No verified answer could be obtained; the reason is for logs only.
    Indeterminate(String),
}

impl RevocationOutcome {
    /// Whether the outcome lets the request proceed.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::NotRevoked)
    }
}

/// Strip DER sign padding so serials compare by magnitude.
///
/// `00 8f 01` and `8f 01` are the same serial; a lone zero stays `00`.
#[must_use]
pub fn normalize_serial(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| *b != 0)
        .unwrap_or_else(|| raw.len().saturating_sub(1));
    &raw[start..]
}
