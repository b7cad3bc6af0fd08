//! Download audit trail.
//!
//! Two events per served artifact, sharing a correlation id:
//!
//! | Event | When |
//! |-------|------|
//! | `download.started` | Headers are ready and the body is about to stream |
//! | `download.finished` | The body ended, failed, or the client went away |
//!
//! The default sink emits each event via `tracing::info!` on the `audit`
//! target as a JSON blob.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use pin_project_lite::pin_project;
use serde::Serialize;
use uuid::Uuid;

use crate::mtls::ClientIdentity;

/// Structured audit event for one download.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DownloadEvent {
    /// Event type string (`"download.started"` or `"download.finished"`).
    pub event: &'static str,
    /// Shared by the started/finished pair.
    pub correlation_id: Uuid,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Numeric client id.
    pub client_id: i64,
    /// Subject organisation, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Backend that served the artifact.
    pub backend: &'static str,
    /// Resolved path or object key.
    pub resource: String,
    /// Bytes streamed (finished only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<u64>,
    /// Whether the body reached its end (finished only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl DownloadEvent {
    /// Construct a `download.started` event.
    #[must_use]
    pub fn started(identity: &ClientIdentity, backend: &'static str, resource: &str) -> Self {
        Self {
            event: "download.started",
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client_id: identity.numeric_id,
            organization: identity.organization.clone(),
            backend,
            resource: resource.to_string(),
            bytes_sent: None,
            completed: None,
        }
    }

    /// The matching `download.finished` event.
    #[must_use]
    pub fn finished(&self, bytes_sent: u64, completed: bool) -> Self {
        Self {
            event: "download.finished",
            timestamp: Utc::now(),
            bytes_sent: Some(bytes_sent),
            completed: Some(completed),
            ..self.clone()
        }
    }
}

/// Receiver of download events.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Record one event. Must not block.
    fn record(&self, event: &DownloadEvent);
}

/// Sink writing to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &DownloadEvent) {
        match serde_json::to_string(event) {
            Ok(ref json) => tracing::info!(target: "audit", audit = %json, "download audit"),
            Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
        }
    }
}

/// Emits `download.finished` exactly once, when dropped.
struct FinishGuard {
    sink: Arc<dyn AuditSink>,
    started: DownloadEvent,
    bytes_sent: u64,
    completed: bool,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.sink
            .record(&self.started.finished(self.bytes_sent, self.completed));
    }
}

pin_project! {
    /// Body wrapper that counts bytes and reports the end of the transfer.
    pub struct AuditedStream<S> {
        #[pin]
        inner: S,
        guard: FinishGuard,
    }
}

impl<S> AuditedStream<S> {
    /// Record `started` now and `finished` when the stream ends or drops.
    pub fn new(inner: S, sink: Arc<dyn AuditSink>, started: DownloadEvent) -> Self {
        sink.record(&started);
        Self {
            inner,
            guard: FinishGuard {
                sink,
                started,
                bytes_sent: 0,
                completed: false,
            },
        }
    }
}

impl<S> Stream for AuditedStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = std::task::ready!(this.inner.poll_next(cx));
        match &item {
            Some(Ok(chunk)) => this.guard.bytes_sent += chunk.len() as u64,
            Some(Err(_)) => {}
            None => this.guard.completed = true,
        }
        Poll::Ready(item)
    }
}
