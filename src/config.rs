//! Gateway configuration
//! Built once at startup and shared read-only with every request

use crate::error::ConfigError;
use hyper::header::HeaderValue;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default upstream API
pub const DEFAULT_UPSTREAM: &str = "https://api.deepseek.com";

/// Scheme used to reach the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Https,
    /// Plain HTTP, for local upstreams
    Http,
}

/// The single upstream every `/api/` request is forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl UpstreamTarget {
    /// Parse an upstream base URL such as `https://api.deepseek.com`
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(input)?;

        let scheme = match url.scheme() {
            "https" => Scheme::Https,
            "http" => Scheme::Http,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let host = url.host_str().ok_or(ConfigError::MissingHost)?.to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;

        Ok(Self { scheme, host, port })
    }

    fn default_port(&self) -> u16 {
        match self.scheme {
            Scheme::Https => 443,
            Scheme::Http => 80,
        }
    }

    /// Value for the outbound `Host` header; the port is left out when it is
    /// the scheme default
    pub fn authority(&self) -> String {
        if self.port == self.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Address passed to the TCP connector
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Https => "https",
            Scheme::Http => "http",
        };
        write!(f, "{}://{}", scheme, self.authority())
    }
}

/// Bearer credential injected into every upstream request
#[derive(Clone)]
pub struct Credential {
    header: HeaderValue,
}

impl Credential {
    pub fn new(api_key: &str) -> Result<Self, ConfigError> {
        let mut header = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| ConfigError::InvalidCredential)?;
        header.set_sensitive(true);
        Ok(Self { header })
    }

    /// Full `authorization` header value, `Bearer <key>`
    pub fn header_value(&self) -> &HeaderValue {
        &self.header
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Which side wins when the upstream response also carries CORS headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorsPrecedence {
    /// Upstream values are kept (they are applied last)
    #[default]
    Upstream,
    /// Gateway values replace upstream values
    Gateway,
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub upstream: UpstreamTarget,
    pub credential: Option<Credential>,
    pub static_dir: PathBuf,
    pub connect_timeout: Duration,
    pub cors_precedence: CorsPrecedence,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            upstream: UpstreamTarget {
                scheme: Scheme::Https,
                host: "api.deepseek.com".to_string(),
                port: 443,
            },
            credential: None,
            static_dir: PathBuf::from("."),
            connect_timeout: Duration::from_secs(10),
            cors_precedence: CorsPrecedence::Upstream,
        }
    }
}
