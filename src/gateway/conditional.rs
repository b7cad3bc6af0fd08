//! Conditional response builder.
//!
//! Entity tags are compared byte for byte against `If-None-Match`. No weak
//! comparison and no tag lists.

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;

use super::codes::ErrorCode;
use crate::storage::ByteStream;

/// Content type of every artifact.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// ETag for a hash-file body: line endings stripped, then quoted.
#[must_use]
pub fn quote_etag(hash: &str) -> String {
    let trimmed = hash.trim_matches(|c| c == '\r' || c == '\n');
    format!("\"{trimmed}\"")
}

/// Raw `If-None-Match` value, if present and visible ASCII.
#[must_use]
pub fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok())
}

/// Exact match of `etag` against the client's `If-None-Match`.
#[must_use]
pub fn is_not_modified(headers: &HeaderMap, etag: &str) -> bool {
    if_none_match(headers).is_some_and(|tag| tag == etag)
}

/// 304 with the entity tag and no body.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] when `etag` is not a valid header value.
pub fn not_modified(etag: &str) -> Result<Response, ErrorCode> {
    Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header(ETAG, etag_value(etag)?)
        .body(Body::empty())
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build 304 response");
            ErrorCode::Internal
        })
}

/// 200 streaming `body`.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] when `etag` is not a valid header value.
pub fn stream(
    etag: &str,
    content_length: Option<u64>,
    body: ByteStream,
) -> Result<Response, ErrorCode> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(ETAG, etag_value(etag)?)
        .header(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    if let Some(len) = content_length {
        builder = builder.header(CONTENT_LENGTH, len);
    }
    builder.body(Body::from_stream(body)).map_err(|e| {
        tracing::error!(error = %e, "Failed to build 200 response");
        ErrorCode::Internal
    })
}

fn etag_value(etag: &str) -> Result<HeaderValue, ErrorCode> {
    HeaderValue::from_str(etag).map_err(|_| {
        tracing::error!(etag, "Entity tag is not a valid header value");
        ErrorCode::Internal
    })
}
