//! Shared fixtures for the gateway integration tests
//!
//! Client certificates come from rcgen, object stores live in memory, and the
//! router is driven with `oneshot` with the peer chain injected directly as a
//! request extension.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::Router;
use bytes::Bytes;
use rcgen::{
    BasicConstraints, CertificateParams, CertifiedIssuer, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, SerialNumber,
};
use rustls::pki_types::CertificateDer;

use artifact_gate::config::Config;
use artifact_gate::gateway::{
    AppState, AuditSink, Authorizer, ContentResolver, DownloadEvent, create_router,
};
use artifact_gate::mtls::PeerCertificates;
use artifact_gate::revocation::{OcspClient, RevocationList};
use artifact_gate::storage::{FetchError, FetchOptions, FetchedObject, ObjectStore};

/// Route every test request goes to
pub const URL: &str = "/sinkit/rest/protostream/resolvercache/";

// ── certificates ────────────────────────────────────────────────────────────

/// Self-signed CA that issues client and server certificates
pub struct TestCa {
    pub der: CertificateDer<'static>,
    /// PKCS#8 of the CA key, for signing OCSP answers
    pub pkcs8: Vec<u8>,
    issuer: CertifiedIssuer<'static, KeyPair>,
}

impl TestCa {
    pub fn new(name: &str) -> Self {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key_pair = KeyPair::generate().unwrap();
        let pkcs8 = key_pair.serialize_der();
        let issuer = CertifiedIssuer::self_signed(params, key_pair).unwrap();
        Self {
            der: issuer.der().clone(),
            pkcs8,
            issuer,
        }
    }

    pub fn pem(&self) -> String {
        self.issuer.pem()
    }

    /// Server certificate for `host` and its key
    pub fn server_cert(&self, host: &str) -> (rcgen::Certificate, KeyPair) {
        let mut params = CertificateParams::new(vec![host.to_string()]).unwrap();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key_pair, &*self.issuer).unwrap();
        (cert, key_pair)
    }
}

/// Subject fields of a generated client certificate
#[derive(Debug, Clone, Default)]
pub struct ClientCert<'a> {
    pub cn: &'a str,
    pub tenant: Option<&'a str>,
    pub organization: Option<&'a str>,
    pub serial: u8,
}

impl<'a> ClientCert<'a> {
    pub fn new(cn: &'a str) -> Self {
        Self {
            cn,
            serial: 0x10,
            ..Self::default()
        }
    }

    pub fn tenant(mut self, tenant: &'a str) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn serial(mut self, serial: u8) -> Self {
        self.serial = serial;
        self
    }

    pub fn organization(mut self, org: &'a str) -> Self {
        self.organization = Some(org);
        self
    }

    fn params(&self) -> CertificateParams {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.cn);
        if let Some(tenant) = self.tenant {
            dn.push(DnType::LocalityName, tenant);
        }
        if let Some(org) = self.organization {
            dn.push(DnType::OrganizationName, org);
        }
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from(vec![self.serial]));
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params
    }

    /// Self-signed certificate wrapped as a verified peer chain
    pub fn chain(&self) -> PeerCertificates {
        let key_pair = KeyPair::generate().unwrap();
        let cert = self.params().self_signed(&key_pair).unwrap();
        PeerCertificates::new(vec![cert.der().clone()])
    }

    /// Certificate issued by `ca`, and its key
    pub fn issued(&self, ca: &TestCa) -> (CertificateDer<'static>, KeyPair) {
        let key_pair = KeyPair::generate().unwrap();
        let cert = self.params().signed_by(&key_pair, &*ca.issuer).unwrap();
        (cert.der().clone(), key_pair)
    }

    /// Certificate issued by `ca` as a peer chain of leaf then CA
    pub fn issued_chain(&self, ca: &TestCa) -> PeerCertificates {
        PeerCertificates::new(vec![self.issued(ca).0, ca.der.clone()])
    }
}

// ── object store ────────────────────────────────────────────────────────────

/// In-memory object store; ETag is `"<key>-etag"`
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    objects: HashMap<String, Bytes>,
    open_delay: Option<Duration>,
    /// Keys fetched, in order
    pub fetched: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_object(mut self, key: &str, len: usize) -> Self {
        self.objects
            .insert(key.to_string(), Bytes::from(vec![b'x'; len]));
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn etag_for(key: &str) -> String {
        format!("\"{key}-etag\"")
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch(&self, key: &str, options: &FetchOptions) -> Result<FetchedObject, FetchError> {
        self.fetched.lock().unwrap().push(key.to_string());
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        let data = self.objects.get(key).ok_or(FetchError::NotFound)?;
        let etag = Self::etag_for(key);
        if options.if_none_match.as_deref() == Some(etag.as_str()) {
            return Err(FetchError::NotModified { etag: Some(etag) });
        }
        let len = data.len() as u64;
        let body = futures::stream::iter(vec![Ok(data.clone())]);
        Ok(FetchedObject {
            etag: Some(etag),
            content_length: Some(len),
            body: Box::pin(body),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ── audit ───────────────────────────────────────────────────────────────────

/// Audit sink recording every event
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<DownloadEvent>>,
}

impl AuditSink for RecordingSink {
    fn record(&self, event: &DownloadEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── router ──────────────────────────────────────────────────────────────────

/// Everything a test router is built from
#[derive(Default)]
pub struct Harness {
    pub config: Config,
    pub crl: Option<RevocationList>,
    pub ocsp: Option<OcspClient>,
    pub ca_bundle: Vec<CertificateDer<'static>>,
    pub main: Option<Arc<dyn ObjectStore>>,
    pub cloud: Option<Arc<dyn ObjectStore>>,
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl Harness {
    /// Filesystem mode serving from `dir`
    pub fn filesystem(dir: &std::path::Path) -> Self {
        let mut config = Config::default();
        config.api.file_dir = dir.display().to_string();
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn router(self) -> Router {
        let config = Arc::new(self.config);
        let authorizer = Authorizer::new(
            self.crl.map(Arc::new),
            self.ocsp,
            Arc::new(self.ca_bundle),
            HeaderName::try_from(config.api.id_header.as_str()).unwrap(),
            config.cloud_routing_enabled(),
        );
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(RecordingSink::default()));
        let resolver =
            ContentResolver::new(Arc::clone(&config), self.main, self.cloud, audit).unwrap();
        let state = AppState::new(config, authorizer, resolver).unwrap();
        create_router(Arc::new(state))
    }
}

/// GET request carrying `peer`, an identity header and optional extras
pub fn request(
    peer: Option<&PeerCertificates>,
    id: Option<&str>,
    extra: &[(&str, &str)],
) -> Request<Body> {
    let mut builder = Request::builder().uri(URL);
    if let Some(id) = id {
        builder = builder.header("x-resolver-id", id);
    }
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    if let Some(peer) = peer {
        request.extensions_mut().insert(peer.clone());
    }
    request
}

/// Value of the error header, or "" when absent
pub fn error_code(response: &axum::response::Response) -> String {
    response
        .headers()
        .get("x-resolver-error")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
