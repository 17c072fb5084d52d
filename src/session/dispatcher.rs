//! Bolt request pipelining and response demultiplexing for one session.
//!
//! Requests are queued together with a handler and a sequence number. The
//! server answers requests strictly in order, so each response belongs to the
//! oldest handler still waiting. Whoever needs progress takes the I/O lock,
//! writes the queued requests and applies responses one at a time, buffering
//! rows into whichever result they belong to.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::channel::Channel;
use crate::config::Config;
use crate::connection::{BoltConnection, Connector};
use crate::error::GraphError;
use crate::hydrate::{Bindings, Params, map_to_bolt};
use crate::message::request::LAST_QUERY;
use crate::message::{ClientMessage, ServerMessage};
use crate::result::state::{Goal, ResultState, Row, SharedResult};
use crate::tx::{SharedTx, TxState};
use crate::types::{BoltDict, BoltValue};

/// What to do with the response to one request.
enum Handler {
    Begin(SharedTx),
    Run(SharedResult),
    Pull(SharedResult),
    Discard(SharedResult),
    Commit(SharedTx),
    Rollback(SharedTx),
    /// Clears a failed server state, along with the transaction it held.
    Reset(Option<SharedTx>),
}

impl Handler {
    fn name(&self) -> &'static str {
        match self {
            Self::Begin(_) => "BEGIN",
            Self::Run(_) => "RUN",
            Self::Pull(_) => "PULL",
            Self::Discard(_) => "DISCARD",
            Self::Commit(_) => "COMMIT",
            Self::Rollback(_) => "ROLLBACK",
            Self::Reset(_) => "RESET",
        }
    }

    fn fail(&self, err: &GraphError) {
        match self {
            Self::Run(r) | Self::Pull(r) | Self::Discard(r) => r.lock().fail(err.clone()),
            Self::Begin(tx) | Self::Commit(tx) | Self::Rollback(tx) => tx.lock().fail(err.clone()),
            Self::Reset(tx) => {
                if let Some(tx) = tx {
                    fail_tx(tx, err);
                }
            }
        }
    }
}

struct Pending {
    seq: u64,
    handler: Handler,
}

#[derive(Default)]
struct Queue {
    /// Requests not yet written.
    outbox: Vec<ClientMessage>,
    /// Handlers in request order, written or not.
    pending: VecDeque<Pending>,
    /// How many of `pending` have been written to the current connection.
    written: usize,
    next_seq: u64,
    /// Last server failure. The server ignores everything until a RESET.
    failure: Option<GraphError>,
    reset_queued: bool,
    /// The transaction the server currently holds open.
    tx: Option<SharedTx>,
    /// Autocommit results whose server stream may still be open.
    autocommit: Vec<SharedResult>,
}

impl Queue {
    fn enqueue(&mut self, msg: ClientMessage, handler: Handler) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::trace!(seq, request = msg.name(), "queued");
        self.outbox.push(msg);
        self.pending.push_back(Pending { seq, handler });
        seq
    }

    /// Queues a PULL (or a DISCARD, for abandoned streams) for an idle stream.
    fn request_rows(&mut self, result: &SharedResult, st: &mut ResultState, batch: i64) {
        st.pull_in_flight = true;
        if st.discarded {
            self.enqueue(ClientMessage::discard(st.qid), Handler::Discard(result.clone()));
        } else {
            self.enqueue(ClientMessage::pull(batch, st.qid), Handler::Pull(result.clone()));
        }
    }

    /// Queues a RESET. The server drops its transaction with it.
    fn queue_reset(&mut self) {
        if self.reset_queued {
            return;
        }
        let tx = self.tx.take();
        self.enqueue(ClientMessage::Reset, Handler::Reset(tx));
        self.reset_queued = true;
    }

    /// Queues a RESET if the server is still failed from an earlier request.
    fn reset_if_failed(&mut self) {
        if self.failure.is_some() {
            self.queue_reset();
        }
    }

    /// Removes the oldest handler once its summary arrives.
    fn complete_head(&mut self) -> Result<Pending, GraphError> {
        let head = self
            .pending
            .pop_front()
            .ok_or_else(|| GraphError::Protocol("response with no request in flight".into()))?;
        self.written = self.written.saturating_sub(1);
        Ok(head)
    }

    fn holds_tx(&self, tx: &SharedTx) -> bool {
        self.tx.as_ref().is_some_and(|t| Arc::ptr_eq(t, tx))
    }

    fn on_success(&mut self, handler: Handler, metadata: BoltDict) {
        match handler {
            Handler::Begin(_) => {}
            Handler::Run(r) => r.lock().on_header(metadata),
            Handler::Pull(r) => {
                let mut st = r.lock();
                if st.on_pull_success(metadata) {
                    let qid = st.qid;
                    st.pull_in_flight = true;
                    drop(st);
                    self.enqueue(ClientMessage::discard(qid), Handler::Discard(r));
                }
            }
            Handler::Discard(r) => r.lock().on_discard_success(metadata),
            Handler::Commit(tx) => {
                let mut t = tx.lock();
                t.bookmark = metadata
                    .get("bookmark")
                    .and_then(BoltValue::as_str)
                    .map(String::from);
                t.state = TxState::Committed;
                drop(t);
                self.release_tx(&tx);
            }
            Handler::Rollback(tx) => {
                tx.lock().state = TxState::RolledBack;
                self.release_tx(&tx);
            }
            Handler::Reset(tx) => {
                self.failure = None;
                self.reset_queued = false;
                if let Some(tx) = tx {
                    close_tx_streams(&tx);
                }
            }
        }
    }

    fn on_failure(&mut self, handler: Handler, err: GraphError) {
        handler.fail(&err);
        if let Handler::Reset(_) = handler {
            self.reset_queued = false;
            return;
        }
        self.failure = Some(err.clone());
        if let Some(tx) = self.tx.clone() {
            fail_tx(&tx, &err);
        }
    }

    fn on_ignored(&mut self, handler: Handler) {
        let err = self
            .failure
            .clone()
            .unwrap_or_else(|| GraphError::Protocol("request ignored by server".into()));
        handler.fail(&err);
    }

    fn release_tx(&mut self, tx: &SharedTx) {
        close_tx_streams(tx);
        if self.holds_tx(tx) {
            self.tx = None;
        }
    }
}

/// Moves `tx` to `Failed` and invalidates its unfinished results.
fn fail_tx(tx: &SharedTx, err: &GraphError) {
    let mut t = tx.lock();
    t.fail(err.clone());
    for r in t.results() {
        r.lock().fail(err.clone());
    }
}

/// Ends every result of `tx` whose server stream closed with it.
fn close_tx_streams(tx: &SharedTx) {
    for r in tx.lock().results() {
        r.lock().truncate();
    }
}

/// Owns one session's Bolt connection and the requests in flight on it.
pub struct Dispatcher {
    session_id: Uuid,
    connector: Arc<dyn Connector>,
    config: Arc<Config>,
    queue: Mutex<Queue>,
    io: tokio::sync::Mutex<Option<BoltConnection>>,
}

impl Dispatcher {
    pub fn new(session_id: Uuid, connector: Arc<dyn Connector>, config: Arc<Config>) -> Self {
        Self {
            session_id,
            connector,
            config,
            queue: Mutex::new(Queue::default()),
            io: tokio::sync::Mutex::new(None),
        }
    }

    /// Writes queued requests and applies one response. Returns `false` when
    /// nothing is in flight.
    async fn step(&self) -> Result<bool, GraphError> {
        let mut io = self.io.lock().await;
        {
            let q = self.queue.lock();
            if q.pending.is_empty() {
                return Ok(false);
            }
            if io.is_none() && q.written > 0 {
                drop(q);
                self.fault(GraphError::ServiceUnavailable(
                    "connection lost with requests in flight".into(),
                ));
                return Ok(true);
            }
        }

        // The connection is taken out while in use so that a cancelled read
        // leaves `None` behind rather than a half-read stream.
        let mut conn = match io.take() {
            Some(conn) => conn,
            None => match BoltConnection::open(self.connector.as_ref(), &self.config).await {
                Ok(conn) => conn,
                Err(err) => {
                    self.fault(err);
                    return Ok(true);
                }
            },
        };

        let outbox = {
            let mut q = self.queue.lock();
            q.written += q.outbox.len();
            std::mem::take(&mut q.outbox)
        };
        for msg in &outbox {
            conn.queue(msg);
        }
        if !outbox.is_empty() {
            tracing::debug!(session = %self.session_id, requests = outbox.len(), "C: flushing");
        }

        let received = match conn.flush().await {
            Ok(()) => conn.recv().await,
            Err(err) => Err(err),
        };
        match received.and_then(|msg| self.apply(msg)) {
            Ok(()) => *io = Some(conn),
            Err(err) => self.fault(err),
        }
        Ok(true)
    }

    fn apply(&self, msg: ServerMessage) -> Result<(), GraphError> {
        let mut q = self.queue.lock();
        match msg {
            ServerMessage::Record { data } => match q.pending.front().map(|p| &p.handler) {
                Some(Handler::Pull(r)) => r.lock().push_row(Row::Wire(data)),
                Some(other) => {
                    return Err(GraphError::Protocol(format!(
                        "RECORD in response to {}",
                        other.name()
                    )));
                }
                None => {
                    return Err(GraphError::Protocol("RECORD with no request in flight".into()));
                }
            },
            ServerMessage::Success { metadata } => {
                let Pending { seq, handler } = q.complete_head()?;
                tracing::debug!(session = %self.session_id, seq, request = handler.name(), "S: SUCCESS");
                q.on_success(handler, metadata);
            }
            ServerMessage::Failure { metadata } => {
                let Pending { seq, handler } = q.complete_head()?;
                let err = GraphError::from_failure(&metadata);
                tracing::debug!(session = %self.session_id, seq, request = handler.name(), error = %err, "S: FAILURE");
                q.on_failure(handler, err);
            }
            ServerMessage::Ignored => {
                let Pending { seq, handler } = q.complete_head()?;
                tracing::debug!(session = %self.session_id, seq, request = handler.name(), "S: IGNORED");
                q.on_ignored(handler);
            }
        }
        Ok(())
    }

    /// Fails everything outstanding after a transport error. The connection
    /// has already been dropped and is never reused.
    fn fault(&self, err: GraphError) {
        let mut q = self.queue.lock();
        tracing::warn!(session = %self.session_id, error = %err, "discarding connection");
        q.outbox.clear();
        q.written = 0;
        q.failure = None;
        q.reset_queued = false;
        for pending in q.pending.drain(..) {
            pending.handler.fail(&err);
        }
        for r in q.autocommit.drain(..) {
            r.lock().fail(err.clone());
        }
        if let Some(tx) = q.tx.take() {
            fail_tx(&tx, &err);
        }
    }

    /// Steps the connection until `done` holds. `done` runs under the queue
    /// lock and may queue the requests it needs.
    async fn drive_until<F>(&self, mut done: F) -> Result<(), GraphError>
    where
        F: FnMut(&mut Queue) -> bool + Send,
    {
        loop {
            let finished = {
                let mut q = self.queue.lock();
                done(&mut q)
            };
            if finished {
                return Ok(());
            }
            if !self.step().await? {
                return Err(GraphError::Protocol(
                    "waiting for a response with no request in flight".into(),
                ));
            }
        }
    }

    /// Buffers (or discards, if abandoned) every open autocommit stream so
    /// the server is ready for a new RUN or BEGIN.
    async fn settle_autocommit(&self) -> Result<(), GraphError> {
        self.drive_until(|q| {
            let open: Vec<SharedResult> = q
                .autocommit
                .iter()
                .filter(|r| !r.lock().is_terminal())
                .cloned()
                .collect();
            for r in &open {
                let mut st = r.lock();
                if st.idle_with_more() {
                    q.request_rows(r, &mut st, -1);
                }
            }
            q.autocommit = open;
            q.autocommit.is_empty()
        })
        .await
    }

    fn run_extra(&self) -> BoltDict {
        match &self.config.database {
            Some(db) => BoltDict::from([("db".to_string(), BoltValue::from(db.as_str()))]),
            None => BoltDict::new(),
        }
    }
}

#[async_trait]
impl Channel for Dispatcher {
    async fn run(
        &self,
        tx: Option<&SharedTx>,
        statement: String,
        params: Params,
        bindings: Bindings,
    ) -> Result<SharedResult, GraphError> {
        let parameters = map_to_bolt(&params)?;
        let fetch_size = self.config.fetch_size;

        let Some(tx) = tx else {
            self.settle_autocommit().await?;
            let mut q = self.queue.lock();
            q.reset_if_failed();
            let result = ResultState::new(q.next_seq, bindings);
            let seq = q.enqueue(
                ClientMessage::Run {
                    query: statement,
                    parameters,
                    extra: self.run_extra(),
                },
                Handler::Run(result.clone()),
            );
            result.lock().pull_in_flight = true;
            q.enqueue(ClientMessage::pull(fetch_size, LAST_QUERY), Handler::Pull(result.clone()));
            q.autocommit.push(result.clone());
            tracing::debug!(session = %self.session_id, seq, "autocommit statement queued");
            return Ok(result);
        };

        if tx.lock().state == TxState::Pending {
            self.settle_autocommit().await?;
        }
        let mut q = self.queue.lock();
        let mut t = tx.lock();
        match t.state {
            TxState::Pending => {
                q.reset_if_failed();
                q.enqueue(
                    ClientMessage::Begin {
                        extra: self.run_extra(),
                    },
                    Handler::Begin(tx.clone()),
                );
                q.tx = Some(tx.clone());
                t.state = TxState::Open;
            }
            TxState::Open => {}
            state => return Err(GraphError::TransactionFinished(state)),
        }
        let result = ResultState::new(q.next_seq, bindings);
        q.enqueue(
            ClientMessage::Run {
                query: statement,
                parameters,
                extra: BoltDict::new(),
            },
            Handler::Run(result.clone()),
        );
        result.lock().pull_in_flight = true;
        q.enqueue(ClientMessage::pull(fetch_size, LAST_QUERY), Handler::Pull(result.clone()));
        t.track(&result);
        Ok(result)
    }

    async fn advance(&self, result: &SharedResult, goal: Goal) -> Result<(), GraphError> {
        self.drive_until(|q| {
            let mut st = result.lock();
            if st.satisfies(goal) {
                return true;
            }
            if st.idle_with_more() {
                match goal {
                    Goal::Rows { batch, .. } => q.request_rows(result, &mut st, batch),
                    Goal::End => q.request_rows(result, &mut st, -1),
                    Goal::Keys => {}
                }
            }
            false
        })
        .await
    }

    fn abandon(&self, result: &SharedResult) {
        let mut q = self.queue.lock();
        let mut st = result.lock();
        if st.is_terminal() || st.discarded {
            return;
        }
        st.discarded = true;
        st.rows.clear();
        if st.idle_with_more() && !st.detached {
            q.request_rows(result, &mut st, -1);
        }
    }

    async fn commit(&self, tx: &SharedTx) -> Result<Option<String>, GraphError> {
        let state = tx.lock().state;
        match state {
            TxState::Open => {}
            TxState::Pending => {
                tx.lock().state = TxState::Committed;
                return Ok(None);
            }
            state => return Err(GraphError::TransactionFinished(state)),
        }

        // The server only accepts COMMIT once every stream is closed.
        self.drive_until(|q| {
            let t = tx.lock();
            if t.state != TxState::Open {
                return true;
            }
            let mut closed = true;
            for r in t.results() {
                let mut st = r.lock();
                if st.is_terminal() {
                    continue;
                }
                closed = false;
                if st.idle_with_more() {
                    q.request_rows(&r, &mut st, -1);
                }
            }
            closed
        })
        .await?;

        {
            let mut q = self.queue.lock();
            let t = tx.lock();
            match t.state {
                TxState::Open => {
                    q.enqueue(ClientMessage::Commit, Handler::Commit(tx.clone()));
                }
                state => {
                    return Err(t
                        .error
                        .clone()
                        .unwrap_or(GraphError::TransactionFinished(state)));
                }
            }
        }
        self.drive_until(|_| tx.lock().state.is_terminal()).await?;

        let t = tx.lock();
        match t.state {
            TxState::Committed => Ok(t.bookmark.clone()),
            state => Err(t
                .error
                .clone()
                .unwrap_or(GraphError::TransactionFinished(state))),
        }
    }

    async fn rollback(&self, tx: &SharedTx) -> Result<(), GraphError> {
        let state = tx.lock().state;
        match state {
            TxState::Pending => {
                tx.lock().state = TxState::RolledBack;
                return Ok(());
            }
            TxState::Open | TxState::Failed => {}
            state => return Err(GraphError::TransactionFinished(state)),
        }

        if state == TxState::Open {
            self.drive_until(|q| {
                let t = tx.lock();
                if t.state != TxState::Open {
                    return true;
                }
                let mut closed = true;
                for r in t.results() {
                    let mut st = r.lock();
                    if st.is_terminal() {
                        continue;
                    }
                    closed = false;
                    st.discarded = true;
                    st.rows.clear();
                    if st.idle_with_more() {
                        q.request_rows(&r, &mut st, -1);
                    }
                }
                closed
            })
            .await?;
            {
                let mut q = self.queue.lock();
                if tx.lock().state == TxState::Open {
                    q.enqueue(ClientMessage::Rollback, Handler::Rollback(tx.clone()));
                }
            }
            self.drive_until(|_| tx.lock().state.is_terminal()).await?;
        }

        // A failed server transaction is cleared with RESET instead.
        let reset_queued = {
            let mut q = self.queue.lock();
            let failed = tx.lock().state == TxState::Failed;
            if failed && q.holds_tx(tx) {
                q.queue_reset();
            }
            failed && q.reset_queued
        };
        if reset_queued {
            self.drive_until(|q| !q.reset_queued).await?;
        }

        let mut t = tx.lock();
        if t.state == TxState::Failed {
            t.state = TxState::RolledBack;
        }
        Ok(())
    }

    fn abandon_tx(&self, tx: &SharedTx) {
        let mut q = self.queue.lock();
        let mut t = tx.lock();
        if !matches!(t.state, TxState::Open | TxState::Failed) || !q.holds_tx(tx) {
            return;
        }
        tracing::debug!(session = %self.session_id, "rolling back abandoned transaction");
        for r in t.results() {
            r.lock().detached = true;
        }
        t.state = TxState::RolledBack;
        drop(t);
        q.queue_reset();
    }

    async fn sync(&self) -> Result<(), GraphError> {
        self.drive_until(|q| q.pending.is_empty()).await
    }

    async fn close(&self) {
        let mut io = self.io.lock().await;
        self.fault(GraphError::Session("session closed".into()));
        if let Some(mut conn) = io.take() {
            if let Err(err) = conn.goodbye().await {
                tracing::debug!(session = %self.session_id, error = %err, "GOODBYE failed");
            }
        }
    }
}
