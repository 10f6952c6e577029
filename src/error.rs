//! Error types for the gateway
//!
//! Startup problems are `ConfigError`s, request-path failures are
//! `GatewayError`s and failures while a body is being relayed are
//! `RelayError`s.

use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used at the body boundary, as hyper does.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Message returned to callers when the API key is missing
pub const CREDENTIAL_MISSING_MESSAGE: &str =
    "API key not configured. Set DEEPSEEK_API_KEY environment variable.";

/// Message returned to callers for any upstream transport failure
pub const PROXY_ERROR_MESSAGE: &str = "Proxy error";

/// Invalid startup configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid upstream URL: {0}")]
    InvalidUpstream(#[from] url::ParseError),

    #[error("unsupported upstream scheme '{0}' (expected https or http)")]
    UnsupportedScheme(String),

    #[error("upstream URL has no host")]
    MissingHost,

    #[error("API key contains characters that are not valid in a header")]
    InvalidCredential,
}

/// Failures while handling a single request
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no API key configured")]
    CredentialMissing,

    #[error("failed to connect to upstream {authority}: {source}")]
    Connect {
        authority: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),

    #[error("timed out after {0:?} connecting to upstream")]
    ConnectTimeout(Duration),

    #[error("HTTP handshake with upstream failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] hyper::Error),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),
}

impl GatewayError {
    /// Status code sent to the caller
    pub fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Message sent to the caller. Transport details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::CredentialMissing => CREDENTIAL_MISSING_MESSAGE,
            _ => PROXY_ERROR_MESSAGE,
        }
    }
}

/// Failure of a relayed body stream
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("body stream failed: {0}")]
    Source(#[source] BoxError),
}
