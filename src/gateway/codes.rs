//! Closed catalog of request rejections.
//!
//! Each variant maps to one HTTP status and one error-header value. The
//! `RSP000nn` prefixes are a wire contract with deployed clients; never
//! renumber them.

use std::fmt;

use axum::http::StatusCode;

/// Every way a request can end other than 200 or 304.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// No verified client certificate on the connection.
    NoClientCertificate,
    /// Leaf serial is listed in the CRL.
    RevokedInCrl,
    /// OCSP gave no verified answer.
    OcspIndeterminate,
    /// OCSP reports a status other than good.
    RevokedInOcsp,
    /// Identity header absent or not an integer.
    InvalidIdHeader {
        /// Configured identity header name.
        header: String,
    },
    /// Certificate CN is not an integer.
    InvalidCommonName,
    /// Certificate id and header id differ.
    IdMismatch {
        /// Id from the certificate CN.
        cert_id: i64,
        /// Id from the request header.
        header_id: i64,
        /// Configured identity header name.
        header: String,
    },
    /// Filesystem artifact not published yet.
    DataFileNotReady,
    /// Artifact exists but its companion hash file does not.
    HashFileUnavailable,
    /// Object not published yet in the store.
    ObjectNotReady,
    /// Object store failed or timed out.
    StorageFailure,
    /// Cloud routing is on and the certificate carries no tenant.
    MissingTenant,
    /// Version header contains characters unfit for a path or key.
    InvalidVersion {
        /// Configured version header name.
        header: String,
    },
    /// Anything unexpected.
    Internal,
}

impl ErrorCode {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoClientCertificate => "RSP00001",
            Self::RevokedInCrl => "RSP00002",
            Self::OcspIndeterminate => "RSP00003",
            Self::RevokedInOcsp => "RSP00004",
            Self::InvalidIdHeader { .. } => "RSP00005",
            Self::InvalidCommonName => "RSP00006",
            Self::IdMismatch { .. } => "RSP00007",
            Self::DataFileNotReady => "RSP00008",
            Self::HashFileUnavailable => "RSP00009",
            Self::ObjectNotReady => "RSP00010",
            Self::StorageFailure => "RSP00011",
            Self::MissingTenant => "RSP00012",
            Self::InvalidVersion { .. } => "RSP00013",
            Self::Internal => "RSP00014",
        }
    }

    /// HTTP status; `try_later` is the operator's not-ready status.
    #[must_use]
    pub fn status(&self, try_later: StatusCode) -> StatusCode {
        match self {
            Self::NoClientCertificate
            | Self::RevokedInCrl
            | Self::RevokedInOcsp
            | Self::InvalidCommonName
            | Self::IdMismatch { .. }
            | Self::MissingTenant => StatusCode::FORBIDDEN,
            Self::InvalidIdHeader { .. } | Self::InvalidVersion { .. } => StatusCode::BAD_REQUEST,
            Self::OcspIndeterminate | Self::HashFileUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::DataFileNotReady | Self::ObjectNotReady => try_later,
            Self::StorageFailure | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Renders the error-header value: code, then a fixed message.
impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        match self {
            Self::NoClientCertificate => write!(f, "{code} no verified TLS client certificate"),
            Self::RevokedInCrl => write!(f, "{code} certificate is revoked in CRL"),
            Self::OcspIndeterminate => {
                write!(f, "{code} certificate cannot be validated with OCSP")
            }
            Self::RevokedInOcsp => write!(f, "{code} certificate is revoked in OCSP"),
            Self::InvalidIdHeader { header } => {
                write!(f, "{code} header {header} is missing or not an integer")
            }
            Self::InvalidCommonName => write!(f, "{code} certificate CN is not a valid integer"),
            Self::IdMismatch {
                cert_id,
                header_id,
                header,
            } => write!(
                f,
                "{code} certificate id {cert_id} does not match id {header_id} in header {header}"
            ),
            Self::DataFileNotReady => write!(f, "{code} data file is not ready yet"),
            Self::HashFileUnavailable => write!(f, "{code} hash file is not available"),
            Self::ObjectNotReady => write!(f, "{code} object is not ready yet"),
            Self::StorageFailure => write!(f, "{code} object store error"),
            Self::MissingTenant => write!(f, "{code} certificate has no tenant"),
            Self::InvalidVersion { header } => {
                write!(f, "{code} header {header} contains invalid characters")
            }
            Self::Internal => write!(f, "{code} internal error"),
        }
    }
}
