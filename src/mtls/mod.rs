//! Mutual TLS: listener bootstrap and client identity.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (rustls verifies client chain against the CA bundle)
//!   → PeerCertificates attached to request extensions
//!   → ClientIdentity extracted from the leaf (CN → id, L → tenant)
//!   → [Revocation + header checks in the authorization gate]
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration types (`TlsConfig`, `PemSource`)
//! - [`identity`]: X.509 field extraction (`ClientIdentity`)
//! - [`cert_manager`]: PEM loading and rustls config building
//! - [`acceptor`]: `axum-server` acceptor capturing the verified chain

pub mod acceptor;
pub mod cert_manager;
pub mod config;
pub mod identity;

pub use acceptor::{PeerCertAcceptor, PeerCertificates};
pub use cert_manager::{build_tls_config, load_certs, load_private_key, parse_certs};
pub use config::{PemSource, TlsConfig};
pub use identity::{ClientIdentity, IdentityError};
