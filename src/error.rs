//! Error types for the artifact gateway.
//!
//! These cover startup and infrastructure failures only. Failures on the
//! request path are resolved into the closed [`crate::gateway::ErrorCode`]
//! catalog and never surface as [`Error`].

use std::io;

use thiserror::Error;

/// Result type alias for the artifact gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Artifact gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded or assembled
    #[error("TLS error: {0}")]
    Tls(String),

    /// Object store client could not be built
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
