//! One physical Bolt connection: handshake, authentication, message I/O.

mod connector;
pub mod handshake;

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

pub use connector::{Connector, TcpConnector};
#[cfg(feature = "tls")]
pub use connector::TlsConnector;

use crate::chunk::{ChunkReader, ChunkWriter};
use crate::config::{AuthToken, Config};
use crate::error::GraphError;
use crate::message::decode::decode_server_message;
use crate::message::encode::encode_client_message;
use crate::message::{ClientMessage, ServerMessage};
use crate::types::{BoltDict, BoltValue};
use crate::version;

/// Any byte stream a Bolt connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type Stream = Box<dyn Transport>;

/// A negotiated, authenticated Bolt connection.
///
/// Requests are queued with [`queue`](Self::queue) and written together on
/// [`flush`](Self::flush); responses come back one at a time from
/// [`recv`](Self::recv) in request order.
pub struct BoltConnection {
    reader: ChunkReader<ReadHalf<Stream>>,
    writer: ChunkWriter<WriteHalf<Stream>>,
    version: (u8, u8),
    read_timeout: Option<Duration>,
    server_agent: Option<String>,
    connection_id: Option<String>,
}

impl BoltConnection {
    /// Connects through `connector`, negotiates a version and runs
    /// HELLO/LOGON with the configured credentials.
    pub async fn open(connector: &dyn Connector, config: &Config) -> Result<Self, GraphError> {
        let stream = connector.connect().await?;
        let mut conn = Self::handshake(stream, config.read_timeout).await?;
        conn.hello(&config.user_agent).await?;
        conn.logon(&config.auth).await?;
        tracing::debug!(
            target_addr = %connector.target(),
            version = ?conn.version,
            server = conn.server_agent.as_deref().unwrap_or("unknown"),
            "Bolt connection ready"
        );
        Ok(conn)
    }

    /// Runs the version handshake over an already-open stream.
    pub async fn handshake(
        mut stream: Stream,
        read_timeout: Option<Duration>,
    ) -> Result<Self, GraphError> {
        let version =
            handshake::client_handshake(&mut stream, &version::client_proposals()).await?;
        let (rh, wh) = tokio::io::split(stream);
        Ok(Self {
            reader: ChunkReader::new(rh),
            writer: ChunkWriter::new(wh),
            version,
            read_timeout,
            server_agent: None,
            connection_id: None,
        })
    }

    /// Returns the negotiated Bolt version.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Encodes a request into the outgoing buffer without writing it.
    pub fn queue(&mut self, msg: &ClientMessage) {
        let mut buf = BytesMut::new();
        encode_client_message(&mut buf, msg);
        tracing::trace!(message = msg.name(), "C: queued");
        self.writer.queue_message(&buf);
    }

    /// Writes every queued request.
    pub async fn flush(&mut self) -> Result<(), GraphError> {
        if self.writer.pending_len() > 0 {
            self.writer.flush().await?;
        }
        Ok(())
    }

    /// Queues and flushes a single request.
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), GraphError> {
        self.queue(msg);
        self.flush().await
    }

    /// Receives the next response, bounded by the read timeout.
    pub async fn recv(&mut self) -> Result<ServerMessage, GraphError> {
        let read = self.reader.read_message();
        let data = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| GraphError::Timeout(limit))??,
            None => read.await?,
        };
        let msg = decode_server_message(&data)?;
        tracing::trace!(response = ?msg, "S: received");
        Ok(msg)
    }

    async fn expect_success(&mut self, request: &str) -> Result<BoltDict, GraphError> {
        match self.recv().await? {
            ServerMessage::Success { metadata } => Ok(metadata),
            ServerMessage::Failure { metadata } => Err(GraphError::from_failure(&metadata)),
            other => Err(GraphError::Protocol(format!(
                "expected SUCCESS after {request}, got {other:?}"
            ))),
        }
    }

    async fn hello(&mut self, user_agent: &str) -> Result<(), GraphError> {
        let mut extra = BoltDict::from([(
            "user_agent".to_string(),
            BoltValue::from(user_agent),
        )]);
        if self.version >= (5, 3) {
            extra.insert(
                "bolt_agent".to_string(),
                BoltValue::Dict(BoltDict::from([(
                    "product".to_string(),
                    BoltValue::from(user_agent),
                )])),
            );
        }
        self.send(&ClientMessage::Hello { extra }).await?;
        let metadata = self.expect_success("HELLO").await?;
        self.server_agent = metadata.get("server").and_then(|v| v.as_str()).map(String::from);
        self.connection_id = metadata
            .get("connection_id")
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(())
    }

    async fn logon(&mut self, auth: &AuthToken) -> Result<(), GraphError> {
        self.send(&ClientMessage::Logon { auth: auth.to_bolt() }).await?;
        self.expect_success("LOGON").await.map(|_| ())
    }

    /// Sends GOODBYE. The server closes the stream without replying.
    pub async fn goodbye(&mut self) -> Result<(), GraphError> {
        self.send(&ClientMessage::Goodbye).await
    }
}

impl std::fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltConnection")
            .field("version", &self.version)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}
