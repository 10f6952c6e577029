//! apigate - A static file server with a streaming API proxy
//!
//! Provides:
//! - Static file serving for a small web front end
//! - Forwarding of `/api/*` to one upstream HTTPS API with the API key injected
//! - End-to-end streaming of request and response bodies (SSE completions)
//! - CORS headers on every response

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod headers;
pub mod proxy;
pub mod relay;
pub mod response;
pub mod server;
pub mod static_files;
pub mod upstream;

pub use config::{CorsPrecedence, Credential, GatewayConfig, Scheme, UpstreamTarget};
pub use dispatcher::{Dispatcher, Route};
pub use error::{ConfigError, GatewayError, RelayError};
pub use proxy::ProxyForwarder;
pub use server::GatewayServer;
pub use static_files::StaticResponder;
pub use upstream::UpstreamConnector;
