//! Transport factories: how a dispatcher obtains a fresh byte stream.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::Transport;
use crate::config::{Config, Endpoint};
use crate::error::GraphError;

/// Opens new transports to one server.
///
/// The dispatcher calls this lazily on first use and again after a
/// connection fault, never reusing a broken stream.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Transport>, GraphError>;

    /// Human-readable target for log fields.
    fn target(&self) -> String;
}

/// Plain TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(endpoint: &Endpoint, config: &Config) -> Self {
        Self {
            address: endpoint.address(),
            connect_timeout: config.connect_timeout,
        }
    }

    async fn open_stream(&self) -> Result<TcpStream, GraphError> {
        let connect = TcpStream::connect(self.address.as_str());
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| GraphError::Timeout(limit))??,
            None => connect.await?,
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, GraphError> {
        let stream = self.open_stream().await?;
        tracing::debug!(address = %self.address, "TCP connection established");
        Ok(Box::new(stream))
    }

    fn target(&self) -> String {
        self.address.clone()
    }
}

/// TCP wrapped in TLS, using a caller-supplied rustls client configuration.
#[cfg(feature = "tls")]
pub struct TlsConnector {
    tcp: TcpConnector,
    host: String,
    tls: tokio_rustls::TlsConnector,
}

#[cfg(feature = "tls")]
impl TlsConnector {
    pub fn new(
        endpoint: &Endpoint,
        config: &Config,
        client_config: std::sync::Arc<tokio_rustls::rustls::ClientConfig>,
    ) -> Self {
        Self {
            tcp: TcpConnector::new(endpoint, config),
            host: endpoint.host.clone(),
            tls: tokio_rustls::TlsConnector::from(client_config),
        }
    }
}

#[cfg(feature = "tls")]
#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, GraphError> {
        let name = rustls_pki_types::ServerName::try_from(self.host.clone())
            .map_err(|e| GraphError::InvalidArgument(format!("invalid TLS server name: {e}")))?;
        let stream = self.tcp.open_stream().await?;
        let stream = self.tls.connect(name, stream).await?;
        tracing::debug!(address = %self.tcp.address, "TLS connection established");
        Ok(Box::new(stream))
    }

    fn target(&self) -> String {
        self.tcp.address.clone()
    }
}
