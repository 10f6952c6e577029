//! Gateway server
//! Accept loop and per-connection HTTP/1.1 handling

use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;
use crate::response::ResponseBody;
use anyhow::{anyhow, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Gateway server
pub struct GatewayServer {
    dispatcher: Arc<Dispatcher>,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(config)),
        }
    }

    /// Bind the configured port on all interfaces and serve forever
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.dispatcher.config().port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        let config = self.dispatcher.config();
        info!("Server running on http://localhost:{}", addr.port());
        info!(
            "API proxy available at http://localhost:{}/api/* -> {}",
            addr.port(),
            config.upstream
        );

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let dispatcher = self.dispatcher.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, remote_addr, dispatcher).await {
                    debug!("HTTP connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Handle a single HTTP connection
    async fn handle_connection(
        stream: TcpStream,
        remote_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let dispatcher = dispatcher.clone();
                    async move { Self::handle_request(req, remote_addr, dispatcher).await }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    /// Handle incoming request
    async fn handle_request(
        req: Request<Incoming>,
        remote_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Response<ResponseBody>, Infallible> {
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        async move {
            let started = Instant::now();
            debug!("Request from {}", remote_addr);

            let response = dispatcher.dispatch(req).await;

            info!(
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Response headers sent"
            );
            Ok(response)
        }
        .instrument(span)
        .await
    }
}
