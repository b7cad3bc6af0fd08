//! Configuration management

use std::{env, path::Path, time::Duration};

use axum::http::StatusCode;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mtls::config::TlsConfig;
use crate::{Error, Result};

/// Longest bind host accepted; anything longer is almost certainly a
/// base64 certificate pasted into the wrong property.
const MAX_BIND_HOST_LEN: usize = 255;

/// Smallest connection buffer hyper accepts.
pub const MIN_HEADER_BYTES: usize = 8192;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// TLS / revocation configuration
    pub tls: TlsConfig,
    /// Served resource configuration
    pub api: ApiConfig,
    /// Object store configuration
    pub object_store: ObjectStoreConfig,
    /// Download audit configuration
    pub audit: AuditConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (ARTIFACT_GATE_ prefix)
        figment = figment.merge(Env::prefixed("ARTIFACT_GATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in object store credentials
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in credential values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("static env-var pattern is valid");

        let mut stores = vec![&mut self.object_store.main];
        if let Some(cloud) = self.object_store.cloud.as_mut() {
            stores.push(&mut cloud.store);
        }
        for store in stores {
            store.access_key = Self::expand_string(&re, &store.access_key);
            store.secret_key = Self::expand_string(&re, &store.secret_key);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Check cross-field constraints before anything is bound or loaded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.len() > MAX_BIND_HOST_LEN {
            return Err(Error::Config(format!(
                "{} long server.host is too long. Could the property be mixed up with a BASE64 cert one?",
                self.server.host.len()
            )));
        }

        self.server.validate()?;
        self.tls.validate()?;
        self.api.validate()?;

        if self.api.use_object_store {
            self.object_store.main.validate("object_store.main")?;
            if let Some(cloud) = &self.object_store.cloud {
                if cloud.customer_id.trim().is_empty() {
                    return Err(Error::Config(
                        "object_store.cloud.customer_id must not be empty".to_string(),
                    ));
                }
                cloud.store.validate("object_store.cloud")?;
            }
        }

        Ok(())
    }

    /// Whether tenant-routed requests go to the cloud store.
    #[must_use]
    pub fn cloud_routing_enabled(&self) -> bool {
        self.api.use_object_store && self.object_store.cloud.is_some()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (IP address or resolvable name)
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Time a client gets to send a complete request head. On HTTP/1.1 this
    /// also closes keep-alive connections idle for longer.
    #[serde(with = "humantime_serde")]
    pub read_header_timeout: Duration,
    /// HTTP/2 keep-alive ping interval; a peer that does not answer a ping
    /// within the same time is disconnected.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Cap on the request head (start line plus headers); larger heads get 431.
    pub max_header_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8443,
            shutdown_timeout: Duration::from_secs(30),
            read_header_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            max_header_bytes: 16 * 1024,
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        if self.read_header_timeout.is_zero() {
            return Err(Error::Config(
                "server.read_header_timeout must be positive".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("server.idle_timeout must be positive".to_string()));
        }
        if self.max_header_bytes < MIN_HEADER_BYTES {
            return Err(Error::Config(format!(
                "server.max_header_bytes must be at least {MIN_HEADER_BYTES}, got {}",
                self.max_header_bytes
            )));
        }
        Ok(())
    }
}

/// The single guarded resource and how artifacts are located on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Route path of the guarded resource
    pub url: String,
    /// Request header carrying the client's numeric identity
    pub id_header: String,
    /// Optional request header selecting an artifact version
    pub version_header: String,
    /// Response header carrying the machine-readable error code
    pub error_header: String,
    /// Status returned when the artifact is not published yet
    pub try_later_status: u16,
    /// Directory holding filesystem artifacts
    pub file_dir: String,
    /// Artifact path template (`{dir}`, `{id}`, `{version}`)
    pub data_file_template: String,
    /// Companion hash path template (`{dir}`, `{id}`)
    pub hash_file_template: String,
    /// Serve from the object store instead of the filesystem
    pub use_object_store: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "/sinkit/rest/protostream/resolvercache/".to_string(),
            id_header: "x-resolver-id".to_string(),
            version_header: "x-version".to_string(),
            error_header: "x-resolver-error".to_string(),
            try_later_status: 466,
            file_dir: "data".to_string(),
            data_file_template: "{dir}/{id}_resolver_cache{version}.bin".to_string(),
            hash_file_template: "{dir}/{id}_resolver_cache.bin.md5".to_string(),
            use_object_store: false,
        }
    }
}

impl ApiConfig {
    fn validate(&self) -> Result<()> {
        if !self.url.starts_with('/') {
            return Err(Error::Config(format!(
                "api.url must start with '/', got '{}'",
                self.url
            )));
        }
        if self.url.contains(['{', '}']) {
            return Err(Error::Config(format!(
                "api.url must be a literal path, got '{}'",
                self.url
            )));
        }
        for (name, value) in [
            ("api.id_header", &self.id_header),
            ("api.version_header", &self.version_header),
            ("api.error_header", &self.error_header),
        ] {
            axum::http::HeaderName::from_bytes(value.as_bytes())
                .map_err(|e| Error::Config(format!("{name} '{value}' is not a header name: {e}")))?;
        }
        // Must be a real status outside the success range.
        if !(400..=599).contains(&self.try_later_status)
            || StatusCode::from_u16(self.try_later_status).is_err()
        {
            return Err(Error::Config(format!(
                "api.try_later_status {} must be a 4xx or 5xx status",
                self.try_later_status
            )));
        }
        require_id_placeholder("api.data_file_template", &self.data_file_template)?;
        require_id_placeholder("api.hash_file_template", &self.hash_file_template)?;
        Ok(())
    }

    /// The configured not-ready status.
    #[must_use]
    pub fn try_later(&self) -> StatusCode {
        StatusCode::from_u16(self.try_later_status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Upper bound for a whole object fetch, body included
    #[serde(with = "humantime_serde")]
    pub get_object_timeout: Duration,
    /// Default store
    pub main: S3StoreConfig,
    /// Dedicated store for the cloud customer (tenant)
    #[serde(default)]
    pub cloud: Option<CloudStoreConfig>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            get_object_timeout: Duration::from_secs(10),
            main: S3StoreConfig::default(),
            cloud: None,
        }
    }
}

/// One S3-compatible bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3StoreConfig {
    /// Endpoint (`host:port` or URL); `None` means AWS
    pub endpoint: Option<String>,
    /// Region
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Access key (supports `${VAR}`)
    pub access_key: String,
    /// Secret key (supports `${VAR}`)
    pub secret_key: String,
    /// Object key template (`{id}`, `{version}`)
    pub data_file_template: String,
    /// Talk plain HTTP to a scheme-less endpoint
    pub insecure: bool,
    /// Path-style addressing (MinIO and friends)
    pub force_path_style: bool,
    /// Trust only the gateway's client CA bundle for the endpoint's TLS
    /// certificate instead of the platform roots
    pub use_ca_bundle: bool,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            data_file_template: "{id}_resolver_cache{version}.bin".to_string(),
            insecure: false,
            force_path_style: true,
            use_ca_bundle: false,
        }
    }
}

impl S3StoreConfig {
    fn validate(&self, section: &str) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::Config(format!("{section}.bucket must not be empty")));
        }
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return Err(Error::Config(format!(
                "{section} requires both access_key and secret_key"
            )));
        }
        require_id_placeholder(&format!("{section}.data_file_template"), &self.data_file_template)
    }
}

/// Cloud tenant store: a bucket plus the tenant routed to it
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloudStoreConfig {
    /// Tenant identifier matched against the certificate Locality
    pub customer_id: String,
    /// Bucket settings
    #[serde(flatten)]
    pub store: S3StoreConfig,
}

/// Download audit configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit `download.started` / `download.finished` events
    pub log_downloads: bool,
}

fn require_id_placeholder(name: &str, template: &str) -> Result<()> {
    if template.contains("{id}") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{name} '{template}' must contain the {{id}} placeholder"
        )))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
