//! Online Certificate Status Protocol client.
//!
//! One nonce-less request per check, SHA-1 `CertID`, POSTed as
//! `application/ocsp-request`. Every round trip owns its request, response
//! and body buffer; nothing is shared between concurrent checks.
//!
//! The answer counts only once its signature verifies against the issuer, or
//! against a delegated responder certificate that the issuer signed for
//! `id-kp-OCSPSigning`.

use std::time::Duration;

use der::asn1::{Any, ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use rustls::pki_types::{CertificateDer, SignatureVerificationAlgorithm};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, warn};
use x509_cert::Certificate;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_ocsp::{
    BasicOcspResponse, CertId, CertStatus, OcspRequest, OcspResponse, OcspResponseStatus, Request,
    TbsRequest, Version,
};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::{RevocationOutcome, normalize_serial};
use crate::{Error, Result};

/// `id-sha1`
const ID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");

/// `id-pkix-ocsp-basic`
const ID_PKIX_OCSP_BASIC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");

/// Content type of an OCSP request body.
pub const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";

/// Complete unsuccessful `OCSPResponse` encodings (RFC 6960 4.2.1).
const ERROR_RESPONSES: [(&[u8], &str); 5] = [
    (&[0x30, 0x03, 0x0A, 0x01, 0x01], "malformed request"),
    (&[0x30, 0x03, 0x0A, 0x01, 0x02], "internal error"),
    (&[0x30, 0x03, 0x0A, 0x01, 0x03], "try again later"),
    (&[0x30, 0x03, 0x0A, 0x01, 0x05], "signature required"),
    (&[0x30, 0x03, 0x0A, 0x01, 0x06], "unauthorized"),
];

// ─────────────────────────────────────────────────────────────────────────────
// Errors and status
// ─────────────────────────────────────────────────────────────────────────────

/// Why no verified OCSP answer was obtained.
#[derive(Debug, Error)]
pub enum OcspError {
    /// Leaf or issuer could not be turned into a request.
    #[error("cannot build OCSP request: {0}")]
    Request(String),

    /// Network failure or timeout.
    #[error("OCSP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Responder answered with a non-200 HTTP status.
    #[error("OCSP responder returned HTTP {0}")]
    HttpStatus(u16),

    /// Responder sent one of the well-known error responses.
    #[error("OCSP responder error: {0}")]
    ErrorResponse(&'static str),

    /// Body is not a usable basic OCSP response.
    #[error("malformed OCSP response: {0}")]
    Malformed(String),

    /// The response signature (or its responder certificate) does not verify.
    #[error("OCSP response signature invalid: {0}")]
    Signature(String),

    /// No single response covers the leaf's serial.
    #[error("OCSP response does not cover the certificate")]
    CertNotCovered,
}

/// Verified status of one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspStatus {
    /// Responder vouches for the certificate.
    Good,
    /// Responder lists the certificate as revoked.
    Revoked,
    /// Responder does not know the certificate.
    Unknown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Responder endpoint plus an HTTP client bounded by the OCSP timeout.
#[derive(Debug, Clone)]
pub struct OcspClient {
    http: reqwest::Client,
    url: String,
}

impl OcspClient {
    /// Build a client for `url` whose every round trip, body included, is
    /// bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Responder URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check `leaf` with the responder.
    ///
    /// A status other than good is [`RevocationOutcome::Revoked`]; any failure
    /// before a verified answer is [`RevocationOutcome::Indeterminate`].
    pub async fn check(
        &self,
        leaf: &CertificateDer<'_>,
        issuer: &CertificateDer<'_>,
    ) -> RevocationOutcome {
        match self.query(leaf, issuer).await {
            Ok(OcspStatus::Good) => RevocationOutcome::NotRevoked,
            Ok(status) => {
                debug!(?status, url = %self.url, "OCSP status is not good");
                RevocationOutcome::Revoked
            }
            Err(e) => {
                warn!(error = %e, url = %self.url, "OCSP check indeterminate");
                RevocationOutcome::Indeterminate(e.to_string())
            }
        }
    }

    /// One full round trip: build, POST, read, classify, verify.
    ///
    /// # Errors
    ///
    /// Returns an [`OcspError`] for every failure short of a verified status.
    pub async fn query(
        &self,
        leaf: &CertificateDer<'_>,
        issuer: &CertificateDer<'_>,
    ) -> std::result::Result<OcspStatus, OcspError> {
        let request = build_request(leaf, issuer)?;

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, OCSP_REQUEST_CONTENT_TYPE)
            .body(request)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(OcspError::HttpStatus(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        parse_response_for_cert(&body, leaf, issuer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// DER `OCSPRequest` for `leaf`, identified with a SHA-1 `CertID`.
///
/// # Errors
///
/// Returns [`OcspError::Request`] if either certificate cannot be parsed.
pub fn build_request(
    leaf: &CertificateDer<'_>,
    issuer: &CertificateDer<'_>,
) -> std::result::Result<Vec<u8>, OcspError> {
    let leaf = Certificate::from_der(leaf.as_ref())
        .map_err(|e| OcspError::Request(format!("leaf: {e}")))?;
    let issuer = Certificate::from_der(issuer.as_ref())
        .map_err(|e| OcspError::Request(format!("issuer: {e}")))?;

    let req_cert = sha1_cert_id(&leaf, &issuer).map_err(|e| OcspError::Request(e.to_string()))?;

    let request = OcspRequest {
        tbs_request: TbsRequest {
            version: Version::V1,
            requestor_name: None,
            request_list: vec![Request {
                req_cert,
                single_request_extensions: None,
            }],
            request_extensions: None,
        },
        optional_signature: None,
    };

    request
        .to_der()
        .map_err(|e| OcspError::Request(e.to_string()))
}

fn sha1_cert_id(leaf: &Certificate, issuer: &Certificate) -> der::Result<CertId> {
    let issuer_name = issuer.tbs_certificate.subject.to_der()?;
    let issuer_key = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();

    Ok(CertId {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: ID_SHA1,
            parameters: Some(Any::null()),
        },
        issuer_name_hash: OctetString::new(Sha1::digest(&issuer_name).to_vec())?,
        issuer_key_hash: OctetString::new(Sha1::digest(issuer_key).to_vec())?,
        serial_number: leaf.tbs_certificate.serial_number.clone(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

/// Classify, parse and verify a responder body for `leaf`.
///
/// # Errors
///
/// Returns an [`OcspError`] for error-coded bodies, parse failures, bad
/// signatures, or a response that does not cover `leaf`.
pub fn parse_response_for_cert(
    body: &[u8],
    leaf: &CertificateDer<'_>,
    issuer: &CertificateDer<'_>,
) -> std::result::Result<OcspStatus, OcspError> {
    if let Some((_, reason)) = ERROR_RESPONSES.iter().find(|(bytes, _)| *bytes == body) {
        return Err(OcspError::ErrorResponse(reason));
    }

    let response =
        OcspResponse::from_der(body).map_err(|e| OcspError::Malformed(e.to_string()))?;
    if response.response_status != OcspResponseStatus::Successful {
        return Err(OcspError::Malformed(format!(
            "response status {:?}",
            response.response_status
        )));
    }
    let bytes = response
        .response_bytes
        .ok_or_else(|| OcspError::Malformed("no response bytes".to_string()))?;
    if bytes.response_type != ID_PKIX_OCSP_BASIC {
        return Err(OcspError::Malformed(format!(
            "unsupported response type {}",
            bytes.response_type
        )));
    }
    let basic = BasicOcspResponse::from_der(bytes.response.as_bytes())
        .map_err(|e| OcspError::Malformed(e.to_string()))?;

    let issuer = Certificate::from_der(issuer.as_ref())
        .map_err(|e| OcspError::Request(format!("issuer: {e}")))?;
    let leaf = Certificate::from_der(leaf.as_ref())
        .map_err(|e| OcspError::Request(format!("leaf: {e}")))?;

    let signer_spki = responder_key(&basic, &issuer)?;
    let tbs = basic
        .tbs_response_data
        .to_der()
        .map_err(|e| OcspError::Malformed(e.to_string()))?;
    verify(
        &signer_spki,
        &basic.signature_algorithm,
        &tbs,
        basic.signature.as_bytes(),
    )
    .map_err(OcspError::Signature)?;

    let serial = normalize_serial(leaf.tbs_certificate.serial_number.as_bytes());
    let single = basic
        .tbs_response_data
        .responses
        .iter()
        .find(|r| normalize_serial(r.cert_id.serial_number.as_bytes()) == serial)
        .ok_or(OcspError::CertNotCovered)?;

    Ok(match single.cert_status {
        CertStatus::Good(_) => OcspStatus::Good,
        CertStatus::Revoked(_) => OcspStatus::Revoked,
        CertStatus::Unknown(_) => OcspStatus::Unknown,
    })
}

/// Key that must have signed the response.
///
/// The issuer itself, unless the response embeds a different certificate;
/// that one must be issuer-signed and carry the OCSP signing EKU.
fn responder_key(
    basic: &BasicOcspResponse,
    issuer: &Certificate,
) -> std::result::Result<SubjectPublicKeyInfoOwned, OcspError> {
    let issuer_spki = &issuer.tbs_certificate.subject_public_key_info;

    let Some(delegate) = basic.certs.as_ref().and_then(|certs| certs.first()) else {
        return Ok(issuer_spki.clone());
    };
    if delegate == issuer {
        return Ok(issuer_spki.clone());
    }

    let delegate_tbs = delegate
        .tbs_certificate
        .to_der()
        .map_err(|e| OcspError::Malformed(e.to_string()))?;
    verify(
        issuer_spki,
        &delegate.signature_algorithm,
        &delegate_tbs,
        delegate.signature.as_bytes(),
    )
    .map_err(|e| OcspError::Signature(format!("responder certificate not signed by issuer: {e}")))?;

    let delegate_der = delegate
        .to_der()
        .map_err(|e| OcspError::Malformed(e.to_string()))?;
    let (_, parsed) = X509Certificate::from_der(&delegate_der)
        .map_err(|e| OcspError::Malformed(e.to_string()))?;
    let ocsp_signing = parsed
        .extended_key_usage()
        .ok()
        .flatten()
        .is_some_and(|eku| eku.value.ocsp_signing);
    if !ocsp_signing {
        return Err(OcspError::Signature(
            "responder certificate lacks OCSP signing usage".to_string(),
        ));
    }

    Ok(delegate.tbs_certificate.subject_public_key_info.clone())
}

/// Verify `signature` over `message` with any provider algorithm matching
/// the key and signature algorithm identifiers.
fn verify(
    spki: &SubjectPublicKeyInfoOwned,
    signature_algorithm: &AlgorithmIdentifierOwned,
    message: &[u8],
    signature: Option<&[u8]>,
) -> std::result::Result<(), String> {
    let signature = signature.ok_or("signature is not octet aligned")?;
    let public_key_alg = alg_id_contents(&spki.algorithm)?;
    let signature_alg = alg_id_contents(signature_algorithm)?;
    let public_key = spki
        .subject_public_key
        .as_bytes()
        .ok_or("public key is not octet aligned")?;

    let candidates: Vec<&dyn SignatureVerificationAlgorithm> =
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .all
            .iter()
            .copied()
            .filter(|alg| {
                *alg.public_key_alg_id() == *public_key_alg
                    && *alg.signature_alg_id() == *signature_alg
            })
            .collect();

    if candidates.is_empty() {
        return Err(format!(
            "unsupported signature algorithm {}",
            signature_algorithm.oid
        ));
    }

    if candidates
        .iter()
        .any(|alg| alg.verify_signature(public_key, message, signature).is_ok())
    {
        Ok(())
    } else {
        Err("signature does not verify".to_string())
    }
}

/// DER of an `AlgorithmIdentifier` without its outer SEQUENCE header.
fn alg_id_contents(alg: &AlgorithmIdentifierOwned) -> std::result::Result<Vec<u8>, String> {
    let mut out = alg.oid.to_der().map_err(|e| e.to_string())?;
    if let Some(params) = &alg.parameters {
        out.extend(params.to_der().map_err(|e| e.to_string())?);
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuer selection
// ─────────────────────────────────────────────────────────────────────────────

/// Issuer of `leaf` for the OCSP `CertID`, taken only from the trusted CA
/// bundle.
///
/// A candidate qualifies when its subject equals the leaf's issuer and its
/// key verifies the leaf's signature. Certificates the client sent along are
/// never considered: a forged issuer with the right name would otherwise let
/// whoever holds its key sign the status answer. `None` when no bundle entry
/// qualifies.
#[must_use]
pub fn select_issuer<'a>(
    leaf: &CertificateDer<'_>,
    ca_bundle: &'a [CertificateDer<'static>],
) -> Option<&'a CertificateDer<'static>> {
    let leaf = Certificate::from_der(leaf.as_ref()).ok()?;
    let leaf_tbs = leaf.tbs_certificate.to_der().ok()?;

    ca_bundle.iter().find(|candidate| {
        let Ok(ca) = Certificate::from_der(candidate.as_ref()) else {
            return false;
        };
        ca.tbs_certificate.subject == leaf.tbs_certificate.issuer
            && verify(
                &ca.tbs_certificate.subject_public_key_info,
                &leaf.signature_algorithm,
                &leaf_tbs,
                leaf.signature.as_bytes(),
            )
            .is_ok()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
