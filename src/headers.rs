//! Header rewriting for both directions of the proxy

use crate::config::{CorsPrecedence, Credential};
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONNECTION, HOST,
};

/// Headers that only describe the hop they arrived on
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// Check whether a header must not be replayed onto another connection
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Headers listed as tokens in `Connection`, which are hop-by-hop as well
fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

/// Build the upstream header set from the caller's headers.
///
/// Hop-by-hop headers are dropped, `host` is set to the upstream authority and
/// `authorization` is replaced by the configured credential. All other headers
/// keep their values and order.
pub fn rewrite_request_headers(
    inbound: HeaderMap,
    upstream_authority: &str,
    credential: &Credential,
) -> HeaderMap {
    let listed = connection_listed(&inbound);
    let mut outbound = HeaderMap::with_capacity(inbound.len());

    // `None` keys repeat the previous name for multi-valued headers
    let mut current: Option<HeaderName> = None;
    for (name, value) in inbound {
        if let Some(name) = name {
            current = Some(name);
        }
        let Some(name) = current.as_ref() else { continue };
        if is_hop_by_hop(name) || listed.contains(name) {
            continue;
        }
        if *name == HOST || *name == AUTHORIZATION {
            continue;
        }
        outbound.append(name.clone(), value);
    }

    if let Ok(host) = HeaderValue::from_str(upstream_authority) {
        outbound.insert(HOST, host);
    }
    outbound.insert(AUTHORIZATION, credential.header_value().clone());

    outbound
}

/// Add the CORS headers to a response.
///
/// With `CorsPrecedence::Upstream` a header already present on the response
/// is left alone, which matches setting the CORS headers first and letting
/// the routed response overwrite them.
pub fn apply_cors(headers: &mut HeaderMap, precedence: CorsPrecedence) {
    let cors = [
        (ACCESS_CONTROL_ALLOW_ORIGIN, CORS_ALLOW_ORIGIN),
        (ACCESS_CONTROL_ALLOW_METHODS, CORS_ALLOW_METHODS),
        (ACCESS_CONTROL_ALLOW_HEADERS, CORS_ALLOW_HEADERS),
    ];

    for (name, value) in cors {
        let value = HeaderValue::from_static(value);
        match precedence {
            CorsPrecedence::Upstream => {
                headers.entry(name).or_insert(value);
            }
            CorsPrecedence::Gateway => {
                headers.insert(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::CONTENT_LENGTH;

    fn credential() -> Credential {
        Credential::new("sk-test").unwrap()
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("localhost:3000"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-hop"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("15"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("x-hop", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers
    }

    #[test]
    fn test_strips_connection_headers() {
        let out = rewrite_request_headers(inbound(), "api.deepseek.com", &credential());
        assert!(!out.contains_key(CONNECTION));
        assert!(!out.contains_key(CONTENT_LENGTH));
        assert!(!out.contains_key("keep-alive"));
        assert!(!out.contains_key("x-hop"));
        assert_eq!(out.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn test_overwrites_host_and_authorization() {
        let mut headers = inbound();
        headers.append(AUTHORIZATION, HeaderValue::from_static("Bearer caller-1"));
        headers.append(AUTHORIZATION, HeaderValue::from_static("Bearer caller-2"));

        let out = rewrite_request_headers(headers, "api.deepseek.com", &credential());

        assert_eq!(out.get(HOST).unwrap(), "api.deepseek.com");
        let auth: Vec<_> = out.get_all(AUTHORIZATION).iter().collect();
        assert_eq!(auth, vec!["Bearer sk-test"]);
    }

    #[test]
    fn test_injects_authorization_when_caller_sent_none() {
        let out = rewrite_request_headers(HeaderMap::new(), "api.deepseek.com", &credential());
        assert_eq!(out.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert_eq!(out.get(HOST).unwrap(), "api.deepseek.com");
    }

    #[test]
    fn test_preserves_multi_valued_headers_in_order() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/event-stream"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.append("x-custom", HeaderValue::from_static("a"));

        let out = rewrite_request_headers(headers, "api.deepseek.com", &credential());

        let accept: Vec<_> = out.get_all("accept").iter().collect();
        assert_eq!(accept, vec!["text/event-stream", "application/json"]);
        assert_eq!(out.get("x-custom").unwrap(), "a");
    }

    #[test]
    fn test_cors_added_to_plain_response() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers, CorsPrecedence::Upstream);
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            CORS_ALLOW_METHODS
        );
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            CORS_ALLOW_HEADERS
        );
    }

    #[test]
    fn test_cors_precedence() {
        let mut upstream = HeaderMap::new();
        upstream.insert(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://chat.example.com"),
        );

        let mut kept = upstream.clone();
        apply_cors(&mut kept, CorsPrecedence::Upstream);
        assert_eq!(
            kept.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://chat.example.com"
        );
        assert!(kept.contains_key(ACCESS_CONTROL_ALLOW_METHODS));

        let mut replaced = upstream;
        apply_cors(&mut replaced, CorsPrecedence::Gateway);
        assert_eq!(replaced.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }
}
