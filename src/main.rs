//! apigate - Main entry point
//!
//! Serves static files and proxies `/api/*` to the upstream API

use anyhow::{Context, Result};
use apigate::config::DEFAULT_UPSTREAM;
use apigate::{CorsPrecedence, Credential, GatewayConfig, GatewayServer, UpstreamTarget};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// apigate - static files plus a streaming, key-injecting API proxy
#[derive(Parser, Debug)]
#[command(name = "apigate")]
#[command(author = "apigate Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Static file server with a streaming API proxy")]
struct Args {
    /// HTTP port to listen on
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// API key injected as `Authorization: Bearer <key>` on proxied requests
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Upstream API base URL
    #[arg(long, env = "UPSTREAM_URL", default_value = DEFAULT_UPSTREAM)]
    upstream: String,

    /// Directory static files are served from
    #[arg(long, env = "STATIC_DIR", default_value = ".")]
    static_dir: PathBuf,

    /// Seconds allowed for connecting to the upstream, TLS included
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value = "10")]
    connect_timeout_secs: u64,

    /// Let the gateway's CORS headers replace the upstream's
    #[arg(long, env = "CORS_OVERRIDE", default_value = "false")]
    cors_override: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let upstream = UpstreamTarget::parse(&args.upstream)
        .with_context(|| format!("Invalid upstream URL '{}'", args.upstream))?;

    let credential = match args.api_key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => Some(Credential::new(key).context("Invalid DEEPSEEK_API_KEY")?),
        None => {
            warn!("Warning: DEEPSEEK_API_KEY environment variable is not set");
            None
        }
    };

    let config = GatewayConfig {
        port: args.port,
        upstream,
        credential,
        static_dir: args.static_dir,
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        cors_precedence: if args.cors_override {
            CorsPrecedence::Gateway
        } else {
            CorsPrecedence::Upstream
        },
    };

    info!("Starting apigate v1.0.0");
    info!("Static files from: {}", config.static_dir.display());

    let server = Arc::new(GatewayServer::new(Arc::new(config)));

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
