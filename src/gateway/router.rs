//! HTTP router and handler

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header::STRICT_TRANSPORT_SECURITY},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::error;

use super::auth::Authorizer;
use super::codes::ErrorCode;
use super::resolver::ContentResolver;
use crate::config::Config;
use crate::mtls::PeerCertificates;
use crate::{Error, Result};

/// HSTS policy sent on every response.
pub const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    /// Immutable configuration
    pub config: Arc<Config>,
    /// Authorization gate
    pub authorizer: Authorizer,
    /// Content resolver
    pub resolver: ContentResolver,
    /// Header carrying the rejection code
    error_header: HeaderName,
    /// Status for not-yet-published artifacts
    try_later: StatusCode,
}

impl AppState {
    /// Assemble the state.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the error header name is invalid.
    pub fn new(config: Arc<Config>, authorizer: Authorizer, resolver: ContentResolver) -> Result<Self> {
        let error_header = HeaderName::try_from(config.api.error_header.as_str())
            .map_err(|e| Error::Config(format!("api.error_header: {e}")))?;
        let try_later = config.api.try_later();
        Ok(Self {
            config,
            authorizer,
            resolver,
            error_header,
            try_later,
        })
    }

    /// Render a rejection: status plus error header, empty body.
    fn reject(&self, code: &ErrorCode) -> Response {
        let mut response = (code.status(self.try_later), Body::empty()).into_response();
        match HeaderValue::from_str(&code.to_string()) {
            Ok(value) => {
                response.headers_mut().insert(self.error_header.clone(), value);
            }
            Err(e) => error!(code = code.code(), error = %e, "Unrenderable error code"),
        }
        response
    }
}

/// Create the router.
///
/// A URL ending in `/` also covers every path below it, as a subtree
/// pattern does; any other URL matches exactly.
pub fn create_router(state: Arc<AppState>) -> Router {
    let url = state.config.api.url.clone();

    let mut router = Router::new().route(&url, get(artifact_handler));
    if url.ends_with('/') {
        router = router.route(&format!("{url}{{*rest}}"), get(artifact_handler));
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS),
        ))
        .with_state(state)
}

/// The single guarded resource.
async fn artifact_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let peer = parts.extensions.get::<PeerCertificates>();
    let headers = &parts.headers;

    let identity = match state.authorizer.authorize(peer, headers).await {
        Ok(identity) => identity,
        Err(code) => return state.reject(&code),
    };

    match state.resolver.serve(&identity, headers).await {
        Ok(response) => response,
        Err(code) => state.reject(&code),
    }
}
