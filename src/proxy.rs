//! Proxy forwarder
//! Rewrites a caller request for the upstream API and relays both bodies as streams

use crate::config::Credential;
use crate::error::{BoxError, GatewayError};
use crate::headers::rewrite_request_headers;
use crate::relay::{self, ChannelBody, RelayState};
use crate::response::{json_error, ResponseBody};
use crate::upstream::UpstreamConnector;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::{Body, SizeHint};
use hyper::http::request::Parts;
use hyper::{Request, Response, Uri, Version};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Path prefix reserved for proxied requests
pub const API_PREFIX: &str = "/api";

/// Strip the reserved prefix from a path-and-query.
///
/// The remainder, query string included, is kept as is. The result always
/// starts with `/`.
pub fn rewrite_path(path_and_query: &str) -> String {
    let rest = path_and_query
        .strip_prefix(API_PREFIX)
        .unwrap_or(path_and_query);

    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

/// Forwards requests to the single upstream
#[derive(Clone)]
pub struct ProxyForwarder {
    connector: UpstreamConnector,
}

impl ProxyForwarder {
    pub fn new(connector: UpstreamConnector) -> Self {
        Self { connector }
    }

    /// Build the upstream request head from the caller's
    pub fn outbound_parts(
        &self,
        mut parts: Parts,
        credential: &Credential,
    ) -> Result<Parts, GatewayError> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        parts.uri = Uri::builder()
            .path_and_query(rewrite_path(path_and_query))
            .build()?;
        parts.version = Version::HTTP_11;

        let authority = self.connector.target().authority();
        let headers = std::mem::take(&mut parts.headers);
        parts.headers = rewrite_request_headers(headers, &authority, credential);

        Ok(parts)
    }

    /// Forward one request and return the upstream response as a stream.
    ///
    /// Any failure before the upstream answers becomes a 500 JSON error.
    /// Failures after that surface as a body error, which aborts the
    /// caller's connection.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        credential: &Credential,
    ) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError> + Send,
    {
        match self.try_forward(req, credential).await {
            Ok(response) => response,
            Err(e) => {
                error!("Proxy request error: {}", e);
                json_error(e.status(), e.public_message())
            }
        }
    }

    async fn try_forward<B>(
        &self,
        req: Request<B>,
        credential: &Credential,
    ) -> Result<Response<ResponseBody>, GatewayError>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError> + Send,
    {
        // Cancelled when this future or the response body is dropped
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let mut state = RelayState::Idle;

        let (parts, body) = req.into_parts();
        let parts = self.outbound_parts(parts, credential)?;
        debug!(
            method = %parts.method,
            uri = %parts.uri,
            upstream = %self.connector.target(),
            ?state,
            "Forwarding request"
        );

        // Start relaying the caller body before the upstream answers
        let outbound_body = if body.is_end_stream() {
            ChannelBody::empty()
        } else {
            let size_hint = body.size_hint();
            let (tx, rx) = relay::channel();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let outcome = relay::pump(body, tx, cancel, "request").await;
                debug!(bytes = outcome.bytes(), ?outcome, "Request body relay finished");
            });
            ChannelBody::new(rx, size_hint)
        };

        let mut sender = self.connector.connect(cancel.clone()).await?;
        let response = sender
            .send_request(Request::from_parts(parts, outbound_body))
            .await
            .map_err(GatewayError::Upstream)?;

        let (parts, upstream_body) = response.into_parts();
        let (tx, rx) = relay::channel();
        let relay_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = relay::pump(upstream_body, tx, relay_cancel, "response").await;
            match outcome.state() {
                RelayState::Complete => debug!(bytes = outcome.bytes(), "Response relayed"),
                state => warn!(?outcome, ?state, "Response relay ended early"),
            }
        });

        state = RelayState::HeadersSent;
        debug!(status = %parts.status, ?state, "Upstream responded");

        // Upstream headers are copied verbatim, `content-length` included, so
        // the hint stays unknown and hyper frames the body from the headers
        let body = ChannelBody::new(rx, SizeHint::default())
            .with_guard(guard)
            .boxed();
        Ok(Response::from_parts(parts, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Scheme, UpstreamTarget};
    use hyper::header::{AUTHORIZATION, CONNECTION, CONTENT_LENGTH, HOST};
    use hyper::{Method, StatusCode};
    use std::time::Duration;

    fn forwarder(port: u16) -> ProxyForwarder {
        let target = UpstreamTarget {
            scheme: Scheme::Http,
            host: "127.0.0.1".to_string(),
            port,
        };
        ProxyForwarder::new(UpstreamConnector::new(target, Duration::from_secs(2)))
    }

    #[test]
    fn test_rewrite_path() {
        assert_eq!(rewrite_path("/api/v1/models"), "/v1/models");
        assert_eq!(rewrite_path("/api/chat/completions"), "/chat/completions");
        assert_eq!(
            rewrite_path("/api/v1/models?limit=5&x=%20"),
            "/v1/models?limit=5&x=%20"
        );
    }

    #[test]
    fn test_rewrite_path_never_empty() {
        assert_eq!(rewrite_path("/api/"), "/");
        assert_eq!(rewrite_path("/api"), "/");
        assert_eq!(rewrite_path("/api?x=1"), "/?x=1");
    }

    #[test]
    fn test_outbound_parts() {
        let credential = Credential::new("sk-test").unwrap();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/chat/completions?stream=1")
            .version(Version::HTTP_10)
            .header(HOST, "localhost:3000")
            .header(AUTHORIZATION, "Bearer caller")
            .header(CONNECTION, "keep-alive")
            .header(CONTENT_LENGTH, "15")
            .header("x-request-source", "web")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();

        let parts = forwarder(8443).outbound_parts(parts, &credential).unwrap();

        assert_eq!(parts.method, Method::POST);
        assert_eq!(parts.uri, "/chat/completions?stream=1");
        assert_eq!(parts.version, Version::HTTP_11);
        assert_eq!(parts.headers.get(HOST).unwrap(), "127.0.0.1:8443");
        assert_eq!(parts.headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert!(!parts.headers.contains_key(CONNECTION));
        assert!(!parts.headers.contains_key(CONTENT_LENGTH));
        assert_eq!(parts.headers.get("x-request-source").unwrap(), "web");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_json_500() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let credential = Credential::new("sk-test").unwrap();
        let req = Request::builder()
            .uri("/api/v1/models")
            .body(http_body_util::Empty::<Bytes>::new())
            .unwrap();

        let response = forwarder(port).forward(req, &credential).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Proxy error");
    }
}
