//! End-to-end gateway tests
//!
//! Drives the real router with injected peer chains:
//! - Rejection catalog (status + error header) for every gate stage
//! - Filesystem delivery, ETag and 304 handling
//! - Object store routing between the main and cloud buckets
//! - Object store timeouts and download auditing

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, STRICT_TRANSPORT_SECURITY};
use pretty_assertions::assert_eq;
use tower::ServiceExt;

use artifact_gate::config::{CloudStoreConfig, S3StoreConfig};
use artifact_gate::revocation::RevocationList;
use artifact_gate::storage::ObjectStore;

use common::{ClientCert, Harness, MemoryStore, RecordingSink, error_code, request};

/// Publish `{id}_resolver_cache{version}.bin` of `len` bytes, optionally with
/// its hash file
fn publish(dir: &std::path::Path, id: &str, version: &str, len: usize, hash: Option<&str>) {
    std::fs::write(
        dir.join(format!("{id}_resolver_cache{version}.bin")),
        vec![b'a'; len],
    )
    .unwrap();
    if let Some(hash) = hash {
        std::fs::write(dir.join(format!("{id}_resolver_cache.bin.md5")), hash).unwrap();
    }
}

async fn body_len(response: axum::response::Response) -> usize {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .len()
}

// ============================================================================
// Gate rejections
// ============================================================================

/// No peer chain at all is a 403 with RSP00001
#[tokio::test]
async fn test_missing_client_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let app = Harness::filesystem(dir.path()).router();

    let response = app.oneshot(request(None, Some("403"), &[])).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(error_code(&response).starts_with("RSP00001"));
}

/// A CN that is not an integer is a 403 with RSP00006
#[tokio::test]
async fn test_non_numeric_common_name() {
    let dir = tempfile::tempdir().unwrap();
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("device-abc").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(error_code(&response).starts_with("RSP00006"));
}

/// CN 9 with header 403 is rejected and both ids are reported
#[tokio::test]
async fn test_header_certificate_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("abc"));
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("9").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let code = error_code(&response);
    assert!(code.starts_with("RSP00007"), "{code}");
    assert!(code.contains(" 9 "), "{code}");
    assert!(code.contains("403"), "{code}");
}

/// Missing or non-integer identity header is a 400
#[tokio::test]
async fn test_invalid_identity_header() {
    let dir = tempfile::tempdir().unwrap();
    let peer = ClientCert::new("403").chain();

    for id in [None, Some("four-hundred"), Some("")] {
        let app = Harness::filesystem(dir.path()).router();
        let response = app.oneshot(request(Some(&peer), id, &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{id:?}");
        assert!(error_code(&response).starts_with("RSP00005"));
    }
}

/// A serial listed in the CRL is a 403 with a revocation-specific message,
/// even when the identity header is also wrong
#[tokio::test]
async fn test_crl_revoked_certificate() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("abc"));
    let mut harness = Harness::filesystem(dir.path());
    harness.crl = Some(RevocationList::from_serials([[0x2a]]));
    let app = harness.router();
    let peer = ClientCert::new("403").serial(0x2a).chain();

    let response = app
        .oneshot(request(Some(&peer), Some("1"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let code = error_code(&response);
    assert!(code.starts_with("RSP00002"), "{code}");
    assert!(code.contains("revoked in CRL"), "{code}");
}

/// A path-like version header is refused before touching any backend
#[tokio::test]
async fn test_version_header_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("403").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[("x-version", "../../etc/passwd")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_code(&response).starts_with("RSP00013"));
}

// ============================================================================
// Filesystem backend
// ============================================================================

/// CN 403 with a 403-byte artifact is served with Content-Length 403
#[tokio::test]
async fn test_filesystem_serves_artifact() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("d41d8cd98f00b204e9800998ecf8427e\n"));
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("403").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "403");
    assert_eq!(response.headers()[CONTENT_TYPE], "application/octet-stream");
    assert_eq!(
        response.headers()[ETAG],
        "\"d41d8cd98f00b204e9800998ecf8427e\""
    );
    assert_eq!(
        response.headers()[STRICT_TRANSPORT_SECURITY],
        "max-age=63072000; includeSubDomains"
    );
    assert!(response.headers().get("x-resolver-error").is_none());
    assert_eq!(body_len(response).await, 403);
}

/// The version header selects `_v3` and its 4030-byte artifact
#[tokio::test]
async fn test_filesystem_serves_versioned_artifact() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("abc"));
    publish(dir.path(), "403", "_v3", 4030, None);
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("403").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[("x-version", " v3 ")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "4030");
    assert_eq!(body_len(response).await, 4030);
}

/// Replaying the ETag of the first response yields 304 with the same ETag
#[tokio::test]
async fn test_filesystem_conditional_get() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("abc123"));
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("403").chain();

    let first = app
        .clone()
        .oneshot(request(Some(&peer), Some("403"), &[]))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let etag = first.headers()[ETAG].to_str().unwrap().to_string();
    assert!(!etag.is_empty());

    let second = app
        .oneshot(request(Some(&peer), Some("403"), &[("if-none-match", &etag)]))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers()[ETAG], etag.as_str());
    assert_eq!(body_len(second).await, 0);
}

/// A stale ETag gets the full artifact again
#[tokio::test]
async fn test_filesystem_stale_etag() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("new"));
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("403").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[("if-none-match", "\"old\"")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ETAG], "\"new\"");
}

/// No data file: configured try-later status, not 404 or 500
#[tokio::test]
async fn test_filesystem_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("404").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("404"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 466);
    assert!(error_code(&response).starts_with("RSP00008"));
}

/// Data file without its hash file: 503 with a distinct code
#[tokio::test]
async fn test_filesystem_missing_hash_file() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, None);
    let app = Harness::filesystem(dir.path()).router();
    let peer = ClientCert::new("403").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(error_code(&response).starts_with("RSP00009"));
}

/// Custom try-later status is honoured
#[tokio::test]
async fn test_custom_try_later_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = Harness::filesystem(dir.path());
    harness.config.api.try_later_status = 425;
    let app = harness.router();
    let peer = ClientCert::new("1").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("1"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 425);
}

// ============================================================================
// Object store backends
// ============================================================================

const CLOUD_CUSTOMER: &str = "1000042";

/// Main bucket holds ids 1 and 3, cloud bucket holds 2 and 4
fn object_store_harness() -> (Harness, Arc<MemoryStore>, Arc<MemoryStore>) {
    let main = Arc::new(
        MemoryStore::new("main")
            .with_object("1_resolver_cache.bin", 100)
            .with_object("3_resolver_cache_v2.bin", 300),
    );
    let cloud = Arc::new(
        MemoryStore::new("cloud")
            .with_object("2_resolver_cache.bin", 200)
            .with_object("4_resolver_cache.bin", 400),
    );

    let mut harness = Harness::default();
    harness.config.api.use_object_store = true;
    harness.config.object_store.cloud = Some(CloudStoreConfig {
        customer_id: CLOUD_CUSTOMER.to_string(),
        store: S3StoreConfig::default(),
    });
    harness.main = Some(Arc::clone(&main) as Arc<dyn ObjectStore>);
    harness.cloud = Some(Arc::clone(&cloud) as Arc<dyn ObjectStore>);
    (harness, main, cloud)
}

/// Cloud tenant ids come from the cloud bucket, everyone else from main
#[tokio::test]
async fn test_object_store_tenant_routing() {
    let (harness, main, cloud) = object_store_harness();
    let app = harness.router();

    let cases = [
        // (cn, tenant, version, expected status, expected length)
        ("1", "other", "", 200, 100),
        ("3", "other", "v2", 200, 300),
        ("2", CLOUD_CUSTOMER, "", 200, 200),
        ("4", CLOUD_CUSTOMER, "", 200, 400),
        ("2", "other", "", 466, 0),
        ("1", CLOUD_CUSTOMER, "", 466, 0),
    ];

    for (cn, tenant, version, status, len) in cases {
        let peer = ClientCert::new(cn).tenant(tenant).chain();
        let response = app
            .clone()
            .oneshot(request(Some(&peer), Some(cn), &[("x-version", version)]))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), status, "cn={cn} tenant={tenant}");
        if status == 200 {
            assert_eq!(response.headers()[CONTENT_LENGTH], len.to_string().as_str());
            assert!(response.headers().contains_key(ETAG));
            assert_eq!(body_len(response).await, len);
        } else {
            assert!(error_code(&response).starts_with("RSP00010"));
        }
    }

    let main_keys = main.fetched.lock().unwrap().clone();
    let cloud_keys = cloud.fetched.lock().unwrap().clone();
    assert_eq!(
        main_keys,
        vec![
            "1_resolver_cache.bin",
            "3_resolver_cache_v2.bin",
            "2_resolver_cache.bin"
        ]
    );
    assert_eq!(
        cloud_keys,
        vec![
            "2_resolver_cache.bin",
            "4_resolver_cache.bin",
            "1_resolver_cache.bin"
        ]
    );
}

/// With cloud routing on, a certificate without tenant is refused
#[tokio::test]
async fn test_object_store_requires_tenant() {
    let (harness, _, _) = object_store_harness();
    let app = harness.router();
    let peer = ClientCert::new("1").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("1"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(error_code(&response).starts_with("RSP00012"));
}

/// Object store 304 carries the ETag and is repeatable
#[tokio::test]
async fn test_object_store_conditional_get() {
    let (harness, _, _) = object_store_harness();
    let app = harness.router();
    let peer = ClientCert::new("2").tenant(CLOUD_CUSTOMER).chain();

    let first = app
        .clone()
        .oneshot(request(Some(&peer), Some("2"), &[]))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let etag = first.headers()[ETAG].to_str().unwrap().to_string();
    assert_eq!(etag, MemoryStore::etag_for("2_resolver_cache.bin"));

    for _ in 0..2 {
        let again = app
            .clone()
            .oneshot(request(Some(&peer), Some("2"), &[("if-none-match", &etag)]))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(again.headers()[ETAG], etag.as_str());
    }
}

/// A store slower than the configured timeout is an opaque 500
#[tokio::test(start_paused = true)]
async fn test_object_store_timeout() {
    let slow = Arc::new(
        MemoryStore::new("slow")
            .with_object("1_resolver_cache.bin", 10)
            .with_open_delay(Duration::from_secs(60)),
    );
    let mut harness = Harness::default();
    harness.config.api.use_object_store = true;
    harness.config.object_store.get_object_timeout = Duration::from_secs(2);
    harness.main = Some(slow as Arc<dyn ObjectStore>);
    let app = harness.router();
    let peer = ClientCert::new("1").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("1"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let code = error_code(&response);
    assert!(code.starts_with("RSP00011"), "{code}");
    assert!(!code.contains("timed out"), "details must not leak: {code}");
}

// ============================================================================
// Audit
// ============================================================================

/// Enabled auditing emits started then finished around the body
#[tokio::test]
async fn test_download_audit_events() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("abc"));
    let sink = Arc::new(RecordingSink::default());
    let mut harness = Harness::filesystem(dir.path());
    harness.config.audit.log_downloads = true;
    harness.audit = Some(Arc::clone(&sink) as Arc<dyn artifact_gate::gateway::AuditSink>);
    let app = harness.router();
    let peer = ClientCert::new("403").organization("Example Org").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_len(response).await, 403);

    let events = sink.events.lock().unwrap().clone();
    let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
    assert_eq!(kinds, vec!["download.started", "download.finished"]);
    assert_eq!(events[0].correlation_id, events[1].correlation_id);
    assert_eq!(events[0].client_id, 403);
    assert_eq!(events[0].organization.as_deref(), Some("Example Org"));
    assert!(events[0].resource.ends_with("403_resolver_cache.bin"));
    assert_eq!(events[1].bytes_sent, Some(403));
    assert_eq!(events[1].completed, Some(true));
}

/// 304 and rejections are not downloads
#[tokio::test]
async fn test_no_audit_without_body() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("abc"));
    let sink = Arc::new(RecordingSink::default());
    let mut harness = Harness::filesystem(dir.path());
    harness.config.audit.log_downloads = true;
    harness.audit = Some(Arc::clone(&sink) as Arc<dyn artifact_gate::gateway::AuditSink>);
    let app = harness.router();
    let peer = ClientCert::new("403").chain();

    let not_modified = app
        .clone()
        .oneshot(request(Some(&peer), Some("403"), &[("if-none-match", "\"abc\"")]))
        .await
        .unwrap();
    assert_eq!(not_modified.status(), StatusCode::NOT_MODIFIED);

    let mismatch = app
        .oneshot(request(Some(&peer), Some("1"), &[]))
        .await
        .unwrap();
    assert_eq!(mismatch.status(), StatusCode::FORBIDDEN);

    assert!(sink.events.lock().unwrap().is_empty());
}

/// Auditing off means the sink is never called
#[tokio::test]
async fn test_audit_disabled() {
    let dir = tempfile::tempdir().unwrap();
    publish(dir.path(), "403", "", 403, Some("abc"));
    let sink = Arc::new(RecordingSink::default());
    let mut harness = Harness::filesystem(dir.path());
    harness.audit = Some(Arc::clone(&sink) as Arc<dyn artifact_gate::gateway::AuditSink>);
    let app = harness.router();
    let peer = ClientCert::new("403").chain();

    let response = app
        .oneshot(request(Some(&peer), Some("403"), &[]))
        .await
        .unwrap();
    assert_eq!(body_len(response).await, 403);

    assert!(sink.events.lock().unwrap().is_empty());
}
