//! Peer-chain capture for the TLS listener.
//!
//! Wraps the `axum-server` rustls acceptor. Once the handshake has verified
//! the client chain, the chain is attached to every request on that
//! connection as a [`PeerCertificates`] extension.

use std::io;
use std::sync::Arc;

use axum::Extension;
use axum::middleware::AddExtension;
use axum_server::accept::{Accept, DefaultAcceptor};
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures::future::BoxFuture;
use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower::Layer;

/// The verified client chain of one connection, leaf first.
///
/// Empty when the session carries no client certificate.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates(pub Arc<Vec<CertificateDer<'static>>>);

impl PeerCertificates {
    /// Wrap an owned chain.
    #[must_use]
    pub fn new(chain: Vec<CertificateDer<'static>>) -> Self {
        Self(Arc::new(chain))
    }

    /// Whether the connection presented no certificate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rustls acceptor that records the peer chain after the handshake.
#[derive(Clone)]
pub struct PeerCertAcceptor {
    inner: RustlsAcceptor<DefaultAcceptor>,
}

impl PeerCertAcceptor {
    /// Build from a finished rustls server config.
    #[must_use]
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            inner: RustlsAcceptor::new(RustlsConfig::from_config(config)),
        }
    }
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, PeerCertificates>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();

        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let chain = stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
                .unwrap_or_default();

            let peer = PeerCertificates::new(chain);
            tracing::trace!(chain_len = peer.0.len(), "TLS handshake complete");

            Ok((stream, Extension(peer).layer(service)))
        })
    }
}
