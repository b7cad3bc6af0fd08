//! Gateway server

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use axum::http::HeaderName;
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use tokio::signal;
use tracing::{info, warn};

use super::audit::TracingAuditSink;
use super::auth::Authorizer;
use super::resolver::ContentResolver;
use super::router::{AppState, create_router};
use crate::config::{Config, ServerConfig};
use crate::mtls::{PeerCertAcceptor, build_tls_config, parse_certs};
use crate::revocation::{OcspClient, RevocationList};
use crate::storage::{ObjectStore, S3Store};
use crate::{Error, Result};

/// What a started gateway loaded; printed by `artifact-gate check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Bind address
    pub addr: SocketAddr,
    /// Guarded route
    pub url: String,
    /// CA certificates trusted for client auth
    pub trust_anchors: usize,
    /// Revoked serials, when a CRL is configured
    pub crl_entries: Option<usize>,
    /// OCSP responder, when configured
    pub ocsp_url: Option<String>,
    /// `filesystem`, `object_store` or `object_store+cloud`
    pub backend: &'static str,
    /// Whether download auditing is on
    pub audit: bool,
}

/// Artifact gateway server
pub struct Gateway {
    /// Configuration
    config: Arc<Config>,
    /// Handler state
    state: Arc<AppState>,
    /// Finished TLS configuration
    tls: Arc<rustls::ServerConfig>,
    /// Startup summary
    summary: Summary,
}

impl Gateway {
    /// Validate the configuration and load every startup resource: TLS
    /// material, CRL, OCSP client, object stores.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, TLS or storage error.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let addr = resolve_bind_addr(&config.server)?;

        let ca_source = config.tls.ca_cert_source()?;
        let ca_pem = ca_source.read()?;
        let ca_bundle = parse_certs(&ca_pem, ca_source)?;
        let tls = Arc::new(build_tls_config(&config.tls, &ca_bundle)?);

        let crl = config
            .tls
            .crl_source()
            .map(RevocationList::load)
            .transpose()?
            .map(Arc::new);

        let ocsp = config
            .tls
            .ocsp_url
            .as_deref()
            .map(|url| OcspClient::new(url, config.tls.ocsp_timeout))
            .transpose()?;

        let (main, cloud) = if config.api.use_object_store {
            let main: Arc<dyn ObjectStore> =
                Arc::new(S3Store::new(&config.object_store.main, Some(&ca_pem))?);
            let cloud = match &config.object_store.cloud {
                Some(cloud) => {
                    let store: Arc<dyn ObjectStore> =
                        Arc::new(S3Store::new(&cloud.store, Some(&ca_pem))?);
                    Some(store)
                }
                None => None,
            };
            (Some(main), cloud)
        } else {
            (None, None)
        };

        let summary = Summary {
            addr,
            url: config.api.url.clone(),
            trust_anchors: ca_bundle.len(),
            crl_entries: crl.as_deref().map(RevocationList::len),
            ocsp_url: ocsp.as_ref().map(|c| c.url().to_string()),
            backend: match (&main, &cloud) {
                (None, _) => "filesystem",
                (Some(_), None) => "object_store",
                (Some(_), Some(_)) => "object_store+cloud",
            },
            audit: config.audit.log_downloads,
        };

        let id_header = HeaderName::try_from(config.api.id_header.as_str())
            .map_err(|e| Error::Config(format!("api.id_header: {e}")))?;
        let authorizer = Authorizer::new(
            crl,
            ocsp,
            Arc::new(ca_bundle),
            id_header,
            config.cloud_routing_enabled(),
        );
        let resolver = ContentResolver::new(
            Arc::clone(&config),
            main,
            cloud,
            Arc::new(TracingAuditSink),
        )?;
        let state = Arc::new(AppState::new(Arc::clone(&config), authorizer, resolver)?);

        Ok(Self {
            config,
            state,
            tls,
            summary,
        })
    }

    /// What was loaded.
    #[must_use]
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Serve until SIGINT/SIGTERM, then drain within `server.shutdown_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or fails.
    pub async fn run(self) -> Result<()> {
        let app = create_router(Arc::clone(&self.state));
        let summary = &self.summary;

        info!("============================================================");
        info!("ARTIFACT GATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(addr = %summary.addr, url = %summary.url, "Listening (mutual TLS)");
        info!(trust_anchors = summary.trust_anchors, backend = summary.backend, "Serving");
        match summary.crl_entries {
            Some(entries) => info!(entries, "CRL loaded"),
            None => warn!("No CRL configured - revoked clients are only caught by OCSP"),
        }
        match &summary.ocsp_url {
            Some(url) => info!(url = %url, "OCSP enabled"),
            None => info!("OCSP disabled"),
        }
        if summary.audit {
            info!("Download auditing enabled");
        }
        info!("============================================================");

        let handle: Handle<SocketAddr> = Handle::new();
        tokio::spawn(shutdown_signal(
            handle.clone(),
            self.config.server.shutdown_timeout,
        ));

        let mut server = axum_server::bind(summary.addr)
            .acceptor(PeerCertAcceptor::new(Arc::clone(&self.tls)))
            .handle(handle);
        apply_connection_limits(server.http_builder(), &self.config.server);
        server.serve(app.into_make_service()).await?;

        info!("Server stopped");
        Ok(())
    }
}

/// First address `server.host:server.port` resolves to; names such as
/// `localhost` are looked up once at startup.
fn resolve_bind_addr(server: &ServerConfig) -> Result<SocketAddr> {
    (server.host.as_str(), server.port)
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("Cannot resolve server.host '{}': {e}", server.host)))?
        .next()
        .ok_or_else(|| {
            Error::Config(format!("server.host '{}' resolves to no address", server.host))
        })
}

/// Slow-client and header-size limits on every accepted connection.
pub fn apply_connection_limits(
    builder: &mut hyper_util::server::conn::auto::Builder<hyper_util::rt::TokioExecutor>,
    server: &ServerConfig,
) {
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(server.read_header_timeout)
        .max_buf_size(server.max_header_bytes);
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(server.idle_timeout)
        .keep_alive_timeout(server.idle_timeout)
        .max_header_list_size(u32::try_from(server.max_header_bytes).unwrap_or(u32::MAX));
}

/// Shutdown signal handler
async fn shutdown_signal(handle: Handle<SocketAddr>, timeout: std::time::Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(timeout = ?timeout, "Shutdown signal received, draining connections");
    handle.graceful_shutdown(Some(timeout));
}
