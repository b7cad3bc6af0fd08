//! S3-compatible object store using the AWS SDK.
//!
//! The SDK never retries on its own; a failed fetch surfaces at once as a
//! storage error.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use aws_smithy_http_client::tls::{self, TlsContext, TrustStore, rustls_provider::CryptoMode};
use tokio_util::io::ReaderStream;
use tracing::instrument;

use super::{FetchError, FetchOptions, FetchedObject, ObjectStore};
use crate::config::S3StoreConfig;
use crate::{Error, Result};

/// One bucket on an S3-compatible endpoint.
pub struct S3Store {
    client: Client,
    bucket: String,
    /// Normalized endpoint, or the canonical AWS host when none is set.
    endpoint: String,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    /// Build a client for one configured bucket.
    ///
    /// `ca_bundle_pem` is the gateway's client CA bundle; it becomes the only
    /// trust anchor for the endpoint when `use_ca_bundle` is set.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` when the bucket or the credential pair is
    /// incomplete, or `use_ca_bundle` is set without a bundle.
    pub fn new(config: &S3StoreConfig, ca_bundle_pem: Option<&[u8]>) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(Error::Storage("s3 config requires a bucket".to_string()));
        }
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return Err(Error::Storage(
                "s3 config requires both access_key and secret_key".to_string(),
            ));
        }

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None, // session token
            None, // expiration
            "artifact-gate-config",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled())
            .force_path_style(config.force_path_style);

        let normalized_endpoint = config
            .endpoint
            .as_deref()
            .map(|e| normalize_endpoint(e, config.insecure));
        if let Some(endpoint_url) = &normalized_endpoint {
            builder = builder.endpoint_url(endpoint_url);
        }

        let plain_http = normalized_endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://"));
        if plain_http {
            // No TLS at all, so no dependency on trust roots
            builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
        } else if config.use_ca_bundle {
            let pem = ca_bundle_pem.ok_or_else(|| {
                Error::Storage("use_ca_bundle is set but no CA bundle is loaded".to_string())
            })?;
            let context = TlsContext::builder()
                .with_trust_store(TrustStore::empty().with_pem_certificate(pem.to_vec()))
                .build()
                .map_err(|e| Error::Storage(format!("s3 TLS context: {e}")))?;
            builder = builder.http_client(
                SmithyHttpClientBuilder::new()
                    .tls_provider(tls::Provider::Rustls(CryptoMode::AwsLc))
                    .tls_context(context)
                    .build_https(),
            );
        }

        let endpoint = normalized_endpoint
            .unwrap_or_else(|| format!("s3.{}.amazonaws.com", config.region));

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            endpoint,
        })
    }

    /// Endpoint requests go to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Give scheme-less endpoints (`minio:9000`) a scheme; `insecure` selects
/// plain HTTP.
fn normalize_endpoint(endpoint: &str, insecure: bool) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else if insecure {
        format!("http://{endpoint}")
    } else {
        format!("https://{endpoint}")
    }
}

/// Map an SDK error onto the fetch classification.
fn map_sdk_error<E>(err: &SdkError<E>) -> FetchError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let SdkError::ServiceError(service_err) = err {
        let raw = service_err.raw();
        match raw.status().as_u16() {
            404 => return FetchError::NotFound,
            304 => {
                return FetchError::NotModified {
                    etag: raw.headers().get("etag").map(str::to_owned),
                };
            }
            _ => {}
        }
    }
    FetchError::Backend(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, options), fields(backend = "s3", bucket = %self.bucket))]
    async fn fetch(
        &self,
        key: &str,
        options: &FetchOptions,
    ) -> std::result::Result<FetchedObject, FetchError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_if_none_match(options.if_none_match.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(&e))?;

        let etag = output.e_tag().map(str::to_owned);
        let content_length = output.content_length().and_then(|l| u64::try_from(l).ok());

        // Stream the body without buffering it
        let body = ReaderStream::new(output.body.into_async_read());

        Ok(FetchedObject {
            etag,
            content_length,
            body: Box::pin(body),
        })
    }

    fn name(&self) -> &str {
        &self.bucket
    }
}
