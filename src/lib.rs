//! Artifact Gate Library
//!
//! Mutual-TLS content delivery gateway: a client device presents an X.509
//! certificate, and the gateway decides whether to stream its per-client
//! artifact from a local directory or an S3-compatible bucket.
//!
//! # Features
//!
//! - **mTLS**: client chains verified by rustls; CN carries the client id
//! - **Revocation**: local CRL plus optional live OCSP, with "revoked" kept
//!   apart from "cannot tell"
//! - **Header binding**: the identity header must match the certificate
//! - **Backends**: filesystem, main bucket, or a dedicated cloud-tenant bucket
//! - **Caching**: exact-match `ETag` / `If-None-Match`
//! - **Audit**: structured download start/finish events

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mtls;
pub mod revocation;
pub mod storage;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns `Error::Internal` if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
