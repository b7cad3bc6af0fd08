//! Content resolver.
//!
//! Picks exactly one backend per request and turns the authorized identity
//! into a path or object key. No fallback between backends.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use axum::response::Response;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

use super::audit::{AuditSink, AuditedStream, DownloadEvent};
use super::codes::ErrorCode;
use super::conditional;
use crate::config::Config;
use crate::mtls::ClientIdentity;
use crate::storage::{ByteStream, FetchError, FetchOptions, ObjectStore, fetch_with_deadline};
use crate::{Error, Result};

/// Where an artifact lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Local directory
    Filesystem,
    /// Default object store
    ObjectStoreMain,
    /// Cloud customer's object store
    ObjectStoreCloud,
}

impl Backend {
    /// Name used in logs and audit events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::ObjectStoreMain => "object_store_main",
            Self::ObjectStoreCloud => "object_store_cloud",
        }
    }
}

/// Resolved artifact location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocator {
    /// File path or object key
    pub key: String,
    /// Backend holding `key`
    pub backend: Backend,
}

/// Backend selection rule.
#[must_use]
pub fn select_backend(config: &Config, tenant: Option<&str>) -> Backend {
    if !config.api.use_object_store {
        return Backend::Filesystem;
    }
    match (&config.object_store.cloud, tenant) {
        (Some(cloud), Some(tenant)) if tenant == cloud.customer_id => Backend::ObjectStoreCloud,
        _ => Backend::ObjectStoreMain,
    }
}

/// Version header turned into a key suffix: trimmed, `_`-prefixed when
/// non-empty.
///
/// Returns `None` when the value could escape the artifact directory or
/// produce an unexpected key.
#[must_use]
pub fn version_suffix(raw: Option<&str>) -> Option<String> {
    let version = raw.map(str::trim).unwrap_or_default();
    if version.is_empty() {
        return Some(String::new());
    }
    let allowed = version
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if !allowed || version.contains("..") {
        return None;
    }
    Some(format!("_{version}"))
}

/// Substitute `{dir}`, `{id}` and `{version}` into `template`.
#[must_use]
pub fn render_template(template: &str, dir: &str, id: i64, version: &str) -> String {
    template
        .replace("{dir}", dir)
        .replace("{id}", &id.to_string())
        .replace("{version}", version)
}

/// Open `path` and take its length from the open handle, so the declared
/// `Content-Length` matches what the handle streams even if a publisher
/// swaps the file in between.
async fn open_artifact(path: &str) -> std::io::Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let length = file.metadata().await?.len();
    Ok((file, length))
}

/// Serves the artifact of an authorized client.
#[derive(Debug)]
pub struct ContentResolver {
    config: Arc<Config>,
    main: Option<Arc<dyn ObjectStore>>,
    cloud: Option<Arc<dyn ObjectStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    version_header: HeaderName,
}

impl ContentResolver {
    /// Build a resolver.
    ///
    /// `audit` is only used when `audit.log_downloads` is set.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the version header name is invalid or a
    /// store required by the configuration is missing.
    pub fn new(
        config: Arc<Config>,
        main: Option<Arc<dyn ObjectStore>>,
        cloud: Option<Arc<dyn ObjectStore>>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let version_header = HeaderName::try_from(config.api.version_header.as_str())
            .map_err(|e| Error::Config(format!("api.version_header: {e}")))?;

        if config.api.use_object_store && main.is_none() {
            return Err(Error::Config(
                "object store mode requires a main store".to_string(),
            ));
        }
        if config.cloud_routing_enabled() && cloud.is_none() {
            return Err(Error::Config(
                "cloud routing requires a cloud store".to_string(),
            ));
        }

        let audit = config.audit.log_downloads.then_some(audit);
        Ok(Self {
            config,
            main,
            cloud,
            audit,
            version_header,
        })
    }

    /// Compute the artifact location for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidVersion`] for an unusable version header.
    pub fn locate(
        &self,
        identity: &ClientIdentity,
        headers: &HeaderMap,
    ) -> std::result::Result<ContentLocator, ErrorCode> {
        let version = match headers.get(&self.version_header).map(|v| v.to_str()) {
            None => version_suffix(None),
            Some(Ok(raw)) => version_suffix(Some(raw)),
            Some(Err(_)) => None,
        };
        let version = version.ok_or_else(|| {
            warn!(
                client_id = identity.numeric_id,
                header = %self.version_header,
                code = "RSP00013",
                "Version header rejected"
            );
            ErrorCode::InvalidVersion {
                header: self.version_header.to_string(),
            }
        })?;

        let backend = select_backend(&self.config, identity.tenant_id.as_deref());
        let api = &self.config.api;
        let key = match backend {
            Backend::Filesystem => render_template(
                &api.data_file_template,
                &api.file_dir,
                identity.numeric_id,
                &version,
            ),
            Backend::ObjectStoreMain => render_template(
                &self.config.object_store.main.data_file_template,
                "",
                identity.numeric_id,
                &version,
            ),
            Backend::ObjectStoreCloud => {
                let template = self
                    .config
                    .object_store
                    .cloud
                    .as_ref()
                    .map_or(&self.config.object_store.main.data_file_template, |c| {
                        &c.store.data_file_template
                    });
                render_template(template, "", identity.numeric_id, &version)
            }
        };

        Ok(ContentLocator { key, backend })
    }

    /// Resolve and serve the artifact, honouring `If-None-Match`.
    ///
    /// # Errors
    ///
    /// Returns the [`ErrorCode`] the handler should render.
    pub async fn serve(
        &self,
        identity: &ClientIdentity,
        headers: &HeaderMap,
    ) -> std::result::Result<Response, ErrorCode> {
        let locator = self.locate(identity, headers)?;
        debug!(
            client_id = identity.numeric_id,
            backend = locator.backend.as_str(),
            key = %locator.key,
            "Resolved artifact"
        );

        match locator.backend {
            Backend::Filesystem => self.serve_file(identity, &locator, headers).await,
            Backend::ObjectStoreMain => {
                self.serve_object(self.main.as_deref(), identity, &locator, headers)
                    .await
            }
            Backend::ObjectStoreCloud => {
                self.serve_object(self.cloud.as_deref(), identity, &locator, headers)
                    .await
            }
        }
    }

    async fn serve_file(
        &self,
        identity: &ClientIdentity,
        locator: &ContentLocator,
        headers: &HeaderMap,
    ) -> std::result::Result<Response, ErrorCode> {
        let path = &locator.key;

        // Existence only; length comes from the opened handle
        match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => {}
            Ok(_) | Err(_) => {
                warn!(
                    client_id = identity.numeric_id,
                    path = %path,
                    subject = %identity.subject,
                    code = "RSP00008",
                    "Data file not ready"
                );
                return Err(ErrorCode::DataFileNotReady);
            }
        }

        let api = &self.config.api;
        let hash_path = render_template(&api.hash_file_template, &api.file_dir, identity.numeric_id, "");
        let hash = match tokio::fs::read_to_string(&hash_path).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    client_id = identity.numeric_id,
                    hash_path = %hash_path,
                    path = %path,
                    error = %e,
                    code = "RSP00009",
                    "Hash file unavailable"
                );
                return Err(ErrorCode::HashFileUnavailable);
            }
        };

        let etag = conditional::quote_etag(&hash);
        if conditional::is_not_modified(headers, &etag) {
            return conditional::not_modified(&etag);
        }

        let (file, length) = open_artifact(path).await.map_err(|e| {
            error!(path = %path, error = %e, "Failed to open data file");
            ErrorCode::Internal
        })?;
        let body: ByteStream = Box::pin(ReaderStream::new(file));
        conditional::stream(&etag, Some(length), self.audited(body, identity, locator))
    }

    async fn serve_object(
        &self,
        store: Option<&dyn ObjectStore>,
        identity: &ClientIdentity,
        locator: &ContentLocator,
        headers: &HeaderMap,
    ) -> std::result::Result<Response, ErrorCode> {
        let Some(store) = store else {
            error!(backend = locator.backend.as_str(), "Object store not configured");
            return Err(ErrorCode::Internal);
        };

        let client_etag = conditional::if_none_match(headers).map(str::to_owned);
        let options = FetchOptions {
            if_none_match: client_etag.clone(),
        };
        let timeout = self.config.object_store.get_object_timeout;

        let object = match fetch_with_deadline(store, &locator.key, &options, timeout).await {
            Ok(object) => object,
            Err(FetchError::NotFound) => {
                warn!(
                    client_id = identity.numeric_id,
                    key = %locator.key,
                    store = store.name(),
                    subject = %identity.subject,
                    code = "RSP00010",
                    "Object not ready"
                );
                return Err(ErrorCode::ObjectNotReady);
            }
            Err(FetchError::NotModified { etag }) => {
                let Some(etag) = etag.or(client_etag) else {
                    error!(key = %locator.key, "Store answered 304 without any entity tag");
                    return Err(ErrorCode::StorageFailure);
                };
                return conditional::not_modified(&etag);
            }
            Err(e) => {
                error!(
                    client_id = identity.numeric_id,
                    key = %locator.key,
                    store = store.name(),
                    error = %e,
                    code = "RSP00011",
                    "Object fetch failed"
                );
                return Err(ErrorCode::StorageFailure);
            }
        };

        // Dropping the object on this path releases its connection
        let Some(etag) = object.etag.clone() else {
            error!(key = %locator.key, store = store.name(), "Store returned an object without ETag");
            return Err(ErrorCode::StorageFailure);
        };

        conditional::stream(
            &etag,
            object.content_length,
            self.audited(object.body, identity, locator),
        )
    }

    fn audited(
        &self,
        body: ByteStream,
        identity: &ClientIdentity,
        locator: &ContentLocator,
    ) -> ByteStream {
        match &self.audit {
            Some(sink) => {
                let started = DownloadEvent::started(identity, locator.backend.as_str(), &locator.key);
                Box::pin(AuditedStream::new(body, Arc::clone(sink), started))
            }
            None => body,
        }
    }
}
