//! Connections to the upstream API
//! One new connection per proxied request, TLS via rustls with the webpki roots

use crate::config::{Scheme, UpstreamTarget};
use crate::error::GatewayError;
use crate::relay::ChannelBody;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Opens connections to the configured upstream
#[derive(Clone)]
pub struct UpstreamConnector {
    target: UpstreamTarget,
    tls: Option<TlsConnector>,
    connect_timeout: Duration,
}

impl UpstreamConnector {
    /// Create a connector; builds the TLS client configuration for `https`
    pub fn new(target: UpstreamTarget, connect_timeout: Duration) -> Self {
        let tls = match target.scheme {
            Scheme::Https => Some(Self::tls_connector()),
            Scheme::Http => None,
        };

        Self {
            target,
            tls,
            connect_timeout,
        }
    }

    fn tls_connector() -> TlsConnector {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        TlsConnector::from(Arc::new(config))
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Connect and perform the HTTP/1.1 handshake.
    ///
    /// The connection is driven on its own task until it finishes or `cancel`
    /// fires, at which point it is dropped and the socket closed.
    pub async fn connect(
        &self,
        cancel: CancellationToken,
    ) -> Result<SendRequest<ChannelBody>, GatewayError> {
        tokio::time::timeout(self.connect_timeout, self.establish(cancel))
            .await
            .map_err(|_| GatewayError::ConnectTimeout(self.connect_timeout))?
    }

    async fn establish(
        &self,
        cancel: CancellationToken,
    ) -> Result<SendRequest<ChannelBody>, GatewayError> {
        let addr = self.target.socket_addr();
        let stream = TcpStream::connect(addr.as_str())
            .await
            .map_err(|source| GatewayError::Connect {
                authority: addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        match &self.tls {
            Some(tls) => {
                let server_name = ServerName::try_from(self.target.host.clone())
                    .map_err(|_| GatewayError::InvalidServerName(self.target.host.clone()))?;
                let stream = tls.connect(server_name, stream).await.map_err(|source| {
                    GatewayError::Tls {
                        host: self.target.host.clone(),
                        source,
                    }
                })?;
                handshake(stream, cancel).await
            }
            None => handshake(stream, cancel).await,
        }
    }
}

async fn handshake<I>(
    io: I,
    cancel: CancellationToken,
) -> Result<SendRequest<ChannelBody>, GatewayError>
where
    I: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, conn) = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(false)
        .handshake(TokioIo::new(io))
        .await
        .map_err(GatewayError::Handshake)?;

    tokio::spawn(async move {
        tokio::select! {
            result = conn => {
                if let Err(e) = result {
                    debug!("Upstream connection error: {}", e);
                }
            }
            () = cancel.cancelled() => {
                debug!("Upstream connection closed by cancellation");
            }
        }
    });

    Ok(sender)
}
