//! Response builders shared by the dispatcher, the proxy and the static responder

use crate::error::RelayError;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Body type of every response the gateway produces
pub type ResponseBody = BoxBody<Bytes, RelayError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Create full body
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Create empty body
pub fn empty_body() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn with_body(
    status: StatusCode,
    content_type: Option<&'static str>,
    body: ResponseBody,
) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

/// Response with no body
pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    with_body(status, None, empty_body())
}

/// Create text response
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ResponseBody> {
    with_body(status, Some("text/plain"), full_body(body))
}

/// Response carrying raw bytes with the given content type
pub fn bytes_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<ResponseBody> {
    with_body(status, Some(content_type), full_body(body))
}

/// Create error response, `{"error": "<message>"}`
pub fn json_error(status: StatusCode, message: &str) -> Response<ResponseBody> {
    let body = serde_json::to_vec(&ErrorBody { error: message })
        .unwrap_or_else(|_| br#"{"error":"internal error"}"#.to_vec());
    with_body(status, Some("application/json"), full_body(body))
}
