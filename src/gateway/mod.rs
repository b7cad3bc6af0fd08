//! Gateway: authorization gate, content resolution and the HTTP surface.
//!
//! ```text
//! request → auth (chain, identity, CRL, OCSP, header)
//!         → resolver (backend, key) → conditional (304 | 200 stream)
//! ```

pub mod audit;
pub mod auth;
pub mod codes;
pub mod conditional;
pub mod resolver;
pub mod router;
mod server;

pub use audit::{AuditSink, DownloadEvent, TracingAuditSink};
pub use auth::Authorizer;
pub use codes::ErrorCode;
pub use resolver::{Backend, ContentLocator, ContentResolver};
pub use router::{AppState, create_router};
pub use server::{Gateway, Summary, apply_connection_limits};
