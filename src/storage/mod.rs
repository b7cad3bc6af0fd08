//! Object store capability.
//!
//! One trait, [`ObjectStore`], with a single conditional fetch. The main and
//! cloud buckets are two instances of it; which one serves a request is
//! decided by the content resolver, never by the store.

pub mod s3;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use thiserror::Error;
use tokio::time::{Instant, Sleep};

pub use s3::S3Store;

/// Streaming object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Conditional options for a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Client `If-None-Match` value, passed through verbatim.
    pub if_none_match: Option<String>,
}

/// A successfully opened object.
pub struct FetchedObject {
    /// Store-reported entity tag, quoted as the store sent it.
    pub etag: Option<String>,
    /// Store-reported length in bytes.
    pub content_length: Option<u64>,
    /// Object body; dropping it releases the underlying connection.
    pub body: ByteStream,
}

impl fmt::Debug for FetchedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedObject")
            .field("etag", &self.etag)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Fetch failures, classified the way the resolver needs them.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No such key.
    #[error("object not found")]
    NotFound,

    /// `If-None-Match` matched.
    #[error("object not modified")]
    NotModified {
        /// Entity tag reported with the 304, if any.
        etag: Option<String>,
    },

    /// The fetch did not complete within its budget.
    #[error("object fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Anything else; detail is for logs only.
    #[error("object store error: {0}")]
    Backend(String),
}

/// Fetch-by-key capability of an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Open `key`, honouring `options`.
    async fn fetch(&self, key: &str, options: &FetchOptions)
    -> Result<FetchedObject, FetchError>;

    /// Short name for logs (usually the bucket).
    fn name(&self) -> &str;
}

/// Fetch with one deadline covering both the open and the whole body.
///
/// If the deadline passes mid-body the stream yields a `TimedOut` error and
/// ends; the inner body is dropped with the stream.
pub async fn fetch_with_deadline(
    store: &dyn ObjectStore,
    key: &str,
    options: &FetchOptions,
    timeout: Duration,
) -> Result<FetchedObject, FetchError> {
    let deadline = Instant::now() + timeout;

    let object = tokio::time::timeout_at(deadline, store.fetch(key, options))
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;

    Ok(FetchedObject {
        body: Box::pin(DeadlineStream::new(object.body, deadline)),
        ..object
    })
}

pin_project! {
    /// Body stream that fails with `TimedOut` once its deadline passes.
    pub struct DeadlineStream<S> {
        #[pin]
        inner: S,
        #[pin]
        sleep: Sleep,
        expired: bool,
    }
}

impl<S> DeadlineStream<S> {
    /// Wrap `inner`, expiring at `deadline`.
    pub fn new(inner: S, deadline: Instant) -> Self {
        Self {
            inner,
            sleep: tokio::time::sleep_until(deadline),
            expired: false,
        }
    }
}

impl<S> Stream for DeadlineStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.expired {
            return Poll::Ready(None);
        }
        if let Poll::Ready(item) = this.inner.poll_next(cx) {
            return Poll::Ready(item);
        }
        if this.sleep.poll(cx).is_ready() {
            *this.expired = true;
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "object transfer deadline exceeded",
            ))));
        }
        Poll::Pending
    }
}
