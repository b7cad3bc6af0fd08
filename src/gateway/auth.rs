//! Authorization gate.
//!
//! Strictly sequential; the first failing stage ends the request:
//!
//! ```text
//! TLS chain present → identity extracted → CRL clear
//!   → OCSP clear (if configured) → header matches certificate → authorized
//! ```

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use super::codes::ErrorCode;
use crate::mtls::identity::parse_numeric_id;
use crate::mtls::{ClientIdentity, IdentityError, PeerCertificates};
use crate::revocation::ocsp::select_issuer;
use crate::revocation::{OcspClient, RevocationList, RevocationOutcome};

/// Resolved gate configuration, shared by every request.
#[derive(Debug)]
pub struct Authorizer {
    /// Revocation list; `None` when no CRL is configured
    crl: Option<Arc<RevocationList>>,
    /// OCSP responder; `None` skips the OCSP stage
    ocsp: Option<OcspClient>,
    /// Configured CA bundle, searched for the OCSP issuer
    ca_bundle: Arc<Vec<CertificateDer<'static>>>,
    /// Identity request header
    id_header: HeaderName,
    /// Whether a tenant (Locality) is mandatory
    require_tenant: bool,
}

impl Authorizer {
    /// Assemble the gate.
    #[must_use]
    pub fn new(
        crl: Option<Arc<RevocationList>>,
        ocsp: Option<OcspClient>,
        ca_bundle: Arc<Vec<CertificateDer<'static>>>,
        id_header: HeaderName,
        require_tenant: bool,
    ) -> Self {
        Self {
            crl,
            ocsp,
            ca_bundle,
            id_header,
            require_tenant,
        }
    }

    /// Run every stage for one request.
    ///
    /// # Errors
    ///
    /// Returns the [`ErrorCode`] of the first failing stage.
    pub async fn authorize(
        &self,
        peer: Option<&PeerCertificates>,
        headers: &HeaderMap,
    ) -> Result<ClientIdentity, ErrorCode> {
        let chain = match peer {
            Some(peer) if !peer.is_empty() => Arc::clone(&peer.0),
            _ => {
                warn!(code = "RSP00001", "Request without a verified client certificate");
                return Err(ErrorCode::NoClientCertificate);
            }
        };

        let identity = ClientIdentity::from_chain(chain, self.require_tenant).map_err(|e| {
            warn!(error = %e, "Client certificate rejected");
            match e {
                IdentityError::NoCertificate => ErrorCode::NoClientCertificate,
                IdentityError::Malformed(_) | IdentityError::InvalidCommonName(_) => {
                    ErrorCode::InvalidCommonName
                }
                IdentityError::MissingTenant => ErrorCode::MissingTenant,
            }
        })?;

        self.check_crl(&identity)?;
        self.check_ocsp(&identity).await?;
        self.check_header(&identity, headers)?;

        debug!(
            client_id = identity.numeric_id,
            tenant = identity.tenant_id.as_deref().unwrap_or("-"),
            "Client authorized"
        );
        Ok(identity)
    }

    fn check_crl(&self, identity: &ClientIdentity) -> Result<(), ErrorCode> {
        if let Some(crl) = &self.crl
            && crl.is_revoked(&identity.serial)
        {
            warn!(
                client_id = identity.numeric_id,
                serial = %identity.serial_hex(),
                subject = %identity.subject,
                code = "RSP00002",
                "Certificate is revoked in CRL"
            );
            return Err(ErrorCode::RevokedInCrl);
        }
        Ok(())
    }

    async fn check_ocsp(&self, identity: &ClientIdentity) -> Result<(), ErrorCode> {
        let Some(ocsp) = &self.ocsp else {
            return Ok(());
        };

        let Some(issuer) = select_issuer(identity.leaf(), &self.ca_bundle) else {
            warn!(
                client_id = identity.numeric_id,
                code = "RSP00003",
                "No trusted CA certificate issued the client certificate"
            );
            return Err(ErrorCode::OcspIndeterminate);
        };

        match ocsp.check(identity.leaf(), issuer).await {
            RevocationOutcome::NotRevoked => Ok(()),
            RevocationOutcome::Revoked => {
                warn!(
                    client_id = identity.numeric_id,
                    serial = %identity.serial_hex(),
                    code = "RSP00004",
                    "Certificate is revoked in OCSP"
                );
                Err(ErrorCode::RevokedInOcsp)
            }
            RevocationOutcome::Indeterminate(reason) => {
                warn!(
                    client_id = identity.numeric_id,
                    reason = %reason,
                    code = "RSP00003",
                    "Certificate cannot be validated with OCSP"
                );
                Err(ErrorCode::OcspIndeterminate)
            }
        }
    }

    fn check_header(&self, identity: &ClientIdentity, headers: &HeaderMap) -> Result<(), ErrorCode> {
        let raw = headers
            .get(&self.id_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);

        let Some(header_id) = parse_numeric_id(raw) else {
            warn!(
                client_id = identity.numeric_id,
                header = %self.id_header,
                code = "RSP00005",
                "Identity header missing or not an integer"
            );
            return Err(ErrorCode::InvalidIdHeader {
                header: self.id_header.to_string(),
            });
        };

        if header_id != identity.numeric_id {
            warn!(
                client_id = identity.numeric_id,
                header_id,
                subject = %identity.subject,
                code = "RSP00007",
                "Certificate id does not match identity header"
            );
            return Err(ErrorCode::IdMismatch {
                cert_id: identity.numeric_id,
                header_id,
                header: self.id_header.to_string(),
            });
        }

        Ok(())
    }
}
