//! Request dispatcher
//! Picks exactly one handler per request: preflight, static files or the proxy

use crate::config::GatewayConfig;
use crate::error::{BoxError, GatewayError};
use crate::headers::apply_cors;
use crate::proxy::ProxyForwarder;
use crate::response::{empty_response, json_error, ResponseBody};
use crate::static_files::{StaticResponder, INDEX_DOCUMENT};
use crate::upstream::UpstreamConnector;
use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

/// Where a request goes, decided from method and path alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    Preflight,
    Proxy,
    /// Static file lookup key
    Static(&'a str),
}

impl<'a> Route<'a> {
    /// First match wins: `OPTIONS`, then `/`, then `/api/`, then static files
    pub fn resolve(method: &Method, path: &'a str) -> Self {
        if method == Method::OPTIONS {
            Route::Preflight
        } else if path == "/" {
            Route::Static(INDEX_DOCUMENT)
        } else if path.starts_with("/api/") {
            Route::Proxy
        } else {
            Route::Static(path)
        }
    }
}

/// Routes requests and applies the CORS headers to every response
pub struct Dispatcher {
    config: Arc<GatewayConfig>,
    forwarder: ProxyForwarder,
    statics: StaticResponder,
}

impl Dispatcher {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        let connector = UpstreamConnector::new(config.upstream.clone(), config.connect_timeout);

        Self {
            forwarder: ProxyForwarder::new(connector),
            statics: StaticResponder::new(config.static_dir.clone()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Handle one request
    pub async fn dispatch<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError> + Send,
    {
        let path = req.uri().path().to_string();

        let mut response = match Route::resolve(req.method(), &path) {
            Route::Preflight => empty_response(StatusCode::OK),
            Route::Static(key) => self.statics.serve(key).await,
            Route::Proxy => match &self.config.credential {
                Some(credential) => self.forwarder.forward(req, credential).await,
                None => {
                    let err = GatewayError::CredentialMissing;
                    warn!("Rejecting {}: {}", path, err);
                    json_error(err.status(), err.public_message())
                }
            },
        };

        apply_cors(response.headers_mut(), self.config.cors_precedence);
        response
    }
}
