//! A scripted Bolt server on in-memory streams, for exercising sessions
//! without a database.
//!
//! Each connection made through a [`StubConnector`] plays the next
//! [`Script`]: HELLO and LOGON are answered automatically, then every
//! request must match the next scripted step, whose replies are written
//! back verbatim. A step with no replies stalls the connection. The stub
//! also tracks the server's protocol state and records any request a real
//! server would refuse.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

use crate::chunk::{ChunkReader, ChunkWriter};
use crate::connection::{Connector, Transport};
use crate::error::GraphError;
use crate::message::decode::decode_client_message;
use crate::message::encode::encode_server_message;
use crate::message::{ClientMessage, ServerMessage};
use crate::types::{BoltDict, BoltNode, BoltRelationship, BoltValue};
use crate::version::{self, BOLT_MAGIC};

/// Server protocol state, as far as a client can drive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Ready,
    Streaming,
    TxReady,
    /// Open result streams inside the transaction.
    TxStreaming(usize),
    Failed,
}

impl ServerState {
    fn accepts(self, msg: &ClientMessage) -> bool {
        use ClientMessage::*;
        match self {
            Self::Ready => matches!(msg, Run { .. } | Begin { .. } | Reset | Goodbye),
            Self::Streaming => matches!(msg, Pull { .. } | Discard { .. } | Reset | Goodbye),
            Self::TxReady => matches!(msg, Run { .. } | Commit | Rollback | Reset | Goodbye),
            Self::TxStreaming(_) => {
                matches!(msg, Run { .. } | Pull { .. } | Discard { .. } | Reset | Goodbye)
            }
            // Everything else is answered with IGNORED.
            Self::Failed => true,
        }
    }

    /// The state after `msg` was answered with the summary `reply`.
    fn after(self, msg: &ClientMessage, reply: &ServerMessage) -> Self {
        let metadata = match reply {
            ServerMessage::Success { metadata } => metadata,
            ServerMessage::Failure { .. } => return Self::Failed,
            _ => return self,
        };
        let more = metadata
            .get("has_more")
            .and_then(BoltValue::as_bool)
            .unwrap_or(false);
        match (self, msg) {
            (_, ClientMessage::Reset) => Self::Ready,
            (Self::Ready, ClientMessage::Run { .. }) => Self::Streaming,
            (Self::Ready, ClientMessage::Begin { .. }) => Self::TxReady,
            (Self::Streaming, ClientMessage::Pull { .. }) if more => Self::Streaming,
            (Self::Streaming, ClientMessage::Pull { .. } | ClientMessage::Discard { .. }) => {
                Self::Ready
            }
            (Self::TxReady, ClientMessage::Run { .. }) => Self::TxStreaming(1),
            (Self::TxReady, ClientMessage::Commit | ClientMessage::Rollback) => Self::Ready,
            (Self::TxStreaming(n), ClientMessage::Run { .. }) => Self::TxStreaming(n + 1),
            (Self::TxStreaming(n), ClientMessage::Pull { .. }) if more => Self::TxStreaming(n),
            (Self::TxStreaming(1), ClientMessage::Pull { .. } | ClientMessage::Discard { .. }) => {
                Self::TxReady
            }
            (Self::TxStreaming(n), ClientMessage::Pull { .. } | ClientMessage::Discard { .. }) => {
                Self::TxStreaming(n - 1)
            }
            (state, _) => state,
        }
    }
}

struct Step {
    request: &'static str,
    replies: Vec<ServerMessage>,
}

/// What one connection expects and answers, in order.
#[derive(Default)]
pub(crate) struct Script {
    steps: VecDeque<Step>,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Expects a request named `request` and answers it with `replies`.
    pub(crate) fn on(
        mut self,
        request: &'static str,
        replies: impl IntoIterator<Item = ServerMessage>,
    ) -> Self {
        self.steps.push_back(Step {
            request,
            replies: replies.into_iter().collect(),
        });
        self
    }
}

#[derive(Default)]
struct Journal {
    received: Vec<ClientMessage>,
    violations: Vec<String>,
}

/// Hands out one scripted server per connection attempt.
pub(crate) struct StubConnector {
    scripts: Mutex<VecDeque<Script>>,
    journal: Arc<Mutex<Journal>>,
    connects: AtomicUsize,
}

impl StubConnector {
    pub(crate) fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            journal: Arc::default(),
            connects: AtomicUsize::new(0),
        })
    }

    /// Requests received after authentication, across all connections.
    pub(crate) fn received(&self) -> Vec<ClientMessage> {
        self.journal.lock().received.clone()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.journal.lock().received.iter().map(ClientMessage::name).collect()
    }

    /// Requests that did not match the script or the server state.
    pub(crate) fn violations(&self) -> Vec<String> {
        self.journal.lock().violations.clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, GraphError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| GraphError::ServiceUnavailable("no scripted server left".into()))?;
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, script, self.journal.clone()));
        Ok(Box::new(client))
    }

    fn target(&self) -> String {
        "stub".to_string()
    }
}

/// `(n, qid)` of every PULL received, for asserting batch sizes.
pub(crate) fn pulls(received: &[ClientMessage]) -> Vec<(i64, Option<i64>)> {
    received
        .iter()
        .filter_map(|msg| match msg {
            ClientMessage::Pull { extra } => Some((
                extra.get("n").and_then(BoltValue::as_int).unwrap_or(0),
                extra.get("qid").and_then(BoltValue::as_int),
            )),
            _ => None,
        })
        .collect()
}

async fn server_handshake<S>(stream: &mut S) -> Result<(), GraphError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await?;
    if magic != BOLT_MAGIC {
        return Err(GraphError::Protocol(format!("invalid magic preamble: {magic:02X?}")));
    }
    let mut proposals = [0u8; 16];
    stream.read_exact(&mut proposals).await?;
    let response = match version::negotiate_version(&proposals) {
        Some((major, minor)) => version::encode_version(major, minor),
        None => version::NO_VERSION,
    };
    stream.write_all(&response).await?;
    stream.flush().await?;
    Ok(())
}

async fn serve(mut stream: DuplexStream, mut script: Script, journal: Arc<Mutex<Journal>>) {
    if server_handshake(&mut stream).await.is_err() {
        return;
    }
    let (rh, wh) = tokio::io::split(stream);
    let mut reader = ChunkReader::new(rh);
    let mut writer = ChunkWriter::new(wh);
    let mut state = ServerState::Ready;
    let mut stalled = false;

    while let Ok(frame) = reader.read_message().await {
        let msg = match decode_client_message(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                journal.lock().violations.push(format!("undecodable request: {err}"));
                return;
            }
        };
        let replies = match &msg {
            ClientMessage::Hello { .. } => vec![ServerMessage::Success {
                metadata: BoltDict::from([
                    ("server".to_string(), BoltValue::from("Stub/5.4")),
                    ("connection_id".to_string(), BoltValue::from("stub-1")),
                ]),
            }],
            ClientMessage::Logon { .. } => vec![ok()],
            ClientMessage::Goodbye => {
                journal.lock().received.push(msg.clone());
                return;
            }
            _ if stalled => {
                journal.lock().received.push(msg.clone());
                continue;
            }
            _ => {
                let mut j = journal.lock();
                if !state.accepts(&msg) {
                    j.violations.push(format!("{} sent in state {state:?}", msg.name()));
                }
                let step = script.steps.pop_front();
                let replies = match step {
                    Some(step) if step.request == msg.name() => step.replies,
                    Some(step) => {
                        j.violations
                            .push(format!("expected {}, received {}", step.request, msg.name()));
                        vec![ServerMessage::failure("Stub.Unexpected", msg.name())]
                    }
                    None => {
                        j.violations.push(format!("unscripted {}", msg.name()));
                        vec![ServerMessage::failure("Stub.Unexpected", msg.name())]
                    }
                };
                if replies.is_empty() {
                    stalled = true;
                }
                if let Some(summary) = replies.iter().find(|r| r.is_summary()) {
                    state = state.after(&msg, summary);
                }
                j.received.push(msg.clone());
                replies
            }
        };
        for reply in &replies {
            let mut buf = BytesMut::new();
            encode_server_message(&mut buf, reply);
            writer.queue_message(&buf);
        }
        if writer.flush().await.is_err() {
            return;
        }
    }
}

pub(crate) fn ok() -> ServerMessage {
    ServerMessage::Success {
        metadata: BoltDict::new(),
    }
}

/// RUN reply announcing `fields`.
pub(crate) fn header(fields: &[&str]) -> ServerMessage {
    ServerMessage::success_with(
        "fields",
        BoltValue::List(fields.iter().map(|f| BoltValue::from(*f)).collect()),
    )
}

/// RUN reply inside a transaction, which also carries the query id.
pub(crate) fn header_qid(fields: &[&str], qid: i64) -> ServerMessage {
    let mut reply = header(fields);
    if let ServerMessage::Success { metadata } = &mut reply {
        metadata.insert("qid".to_string(), BoltValue::Integer(qid));
    }
    reply
}

pub(crate) fn record(values: impl IntoIterator<Item = BoltValue>) -> ServerMessage {
    ServerMessage::Record {
        data: values.into_iter().collect(),
    }
}

/// One single-column record per integer.
pub(crate) fn records(values: impl IntoIterator<Item = i64>) -> Vec<ServerMessage> {
    values
        .into_iter()
        .map(|n| record([BoltValue::Integer(n)]))
        .collect()
}

/// PULL reply when the server holds further rows.
pub(crate) fn more() -> ServerMessage {
    ServerMessage::success_with("has_more", true)
}

/// PULL reply closing the stream.
pub(crate) fn done() -> ServerMessage {
    ServerMessage::success_with("type", "rw")
}

pub(crate) fn node(id: i64, labels: &[&str], properties: &[(&str, BoltValue)]) -> BoltValue {
    BoltValue::Node(BoltNode {
        id,
        labels: labels.iter().map(|l| l.to_string()).collect(),
        properties: properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        element_id: format!("4:stub:{id}"),
    })
}

pub(crate) fn relationship(id: i64, start: i64, rel_type: &str, end: i64) -> BoltValue {
    BoltValue::Relationship(BoltRelationship {
        id,
        start_node_id: start,
        end_node_id: end,
        rel_type: rel_type.to_string(),
        properties: BoltDict::new(),
        element_id: format!("5:stub:{id}"),
        start_element_id: format!("4:stub:{start}"),
        end_element_id: format!("4:stub:{end}"),
    })
}

/// `replies` followed by a closing PULL summary.
pub(crate) fn then_done(mut replies: Vec<ServerMessage>) -> Vec<ServerMessage> {
    replies.push(done());
    replies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tracks_open_streams_in_a_transaction() {
        let run = ClientMessage::Run {
            query: "RETURN 1".into(),
            parameters: BoltDict::new(),
            extra: BoltDict::new(),
        };
        let pull = ClientMessage::pull_all();
        let state = ServerState::TxReady.after(&run, &header(&["n"]));
        let state = state.after(&run, &header(&["n"]));
        assert_eq!(state, ServerState::TxStreaming(2));
        assert!(!state.accepts(&ClientMessage::Commit));
        let state = state.after(&pull, &more()).after(&pull, &done());
        assert_eq!(state, ServerState::TxStreaming(1));
        let state = state.after(&pull, &done());
        assert_eq!(state, ServerState::TxReady);
        assert!(state.accepts(&ClientMessage::Commit));
    }

    #[test]
    fn failure_then_reset() {
        let run = ClientMessage::Run {
            query: "X".into(),
            parameters: BoltDict::new(),
            extra: BoltDict::new(),
        };
        let state = ServerState::Ready.after(&run, &ServerMessage::failure("Neo.ClientError.X", "x"));
        assert_eq!(state, ServerState::Failed);
        assert_eq!(state.after(&ClientMessage::Reset, &ok()), ServerState::Ready);
    }
}
