//! Explicit transactions.

mod ops;
pub mod presub;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub use ops::GraphObject;

use crate::error::GraphError;
use crate::hydrate::{Bindings, Params, Value};
use crate::result::state::{ResultState, SharedResult};
use crate::result::{Cursor, QueryResult};
use crate::session::Session;

/// Lifecycle of a transaction.
///
/// `Pending` until the first statement is submitted, `Open` until it is
/// committed or rolled back. A server failure moves it to `Failed`, from
/// which only [`Transaction::rollback`] is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    Pending,
    Open,
    Committed,
    RolledBack,
    Failed,
}

impl TxState {
    /// No further statements are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        })
    }
}

pub(crate) type SharedTx = Arc<Mutex<TxInner>>;

/// Transaction state shared with the channel that executes it.
#[derive(Debug)]
pub(crate) struct TxInner {
    pub(crate) state: TxState,
    /// The failure that moved the transaction to `Failed`.
    pub(crate) error: Option<GraphError>,
    pub(crate) bookmark: Option<String>,
    /// Transaction resource of the HTTP endpoint, once begun.
    pub(crate) location: Option<String>,
    results: Vec<Weak<Mutex<ResultState>>>,
}

impl TxInner {
    pub(crate) fn new() -> SharedTx {
        Arc::new(Mutex::new(Self {
            state: TxState::Pending,
            error: None,
            bookmark: None,
            location: None,
            results: Vec::new(),
        }))
    }

    pub(crate) fn track(&mut self, result: &SharedResult) {
        self.results.retain(|r| r.strong_count() > 0);
        self.results.push(Arc::downgrade(result));
    }

    /// Results still referenced by a reader or by a request in flight.
    pub(crate) fn results(&self) -> Vec<SharedResult> {
        self.results.iter().filter_map(Weak::upgrade).collect()
    }

    /// Records the first failure. Committed and rolled back transactions
    /// are left alone.
    pub(crate) fn fail(&mut self, error: GraphError) {
        if matches!(self.state, TxState::Committed | TxState::RolledBack) {
            return;
        }
        if self.state != TxState::Failed {
            tracing::debug!(error = %error, "transaction failed");
            self.state = TxState::Failed;
        }
        self.error.get_or_insert(error);
    }
}

/// A unit of work on one session.
///
/// Statements are pipelined: [`run`](Self::run) queues the statement and
/// returns at once, and rows are read as the returned cursors are advanced.
/// Dropping an open transaction rolls it back.
pub struct Transaction {
    shared: SharedTx,
    session: Session,
}

impl Transaction {
    pub(crate) fn new(session: Session, shared: SharedTx) -> Self {
        Self { shared, session }
    }

    pub fn state(&self) -> TxState {
        self.shared.lock().state
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Bookmark returned by the server on commit.
    pub fn bookmark(&self) -> Option<String> {
        self.shared.lock().bookmark.clone()
    }

    /// Queues `statement` in this transaction. `«key»` tokens are replaced
    /// with the text of `params[key]` first; the remaining parameters are
    /// sent bound.
    pub async fn run(&self, statement: &str, params: Params) -> Result<Cursor, GraphError> {
        let result = self.run_bound(statement, params, Bindings::new()).await?;
        Ok(Cursor::new(result))
    }

    /// Runs `statement` and returns the first field of its first record.
    pub async fn evaluate(&self, statement: &str, params: Params) -> Result<Option<Value>, GraphError> {
        self.run(statement, params).await?.evaluate(0).await
    }

    pub(crate) async fn run_bound(
        &self,
        statement: &str,
        params: Params,
        bindings: Bindings,
    ) -> Result<QueryResult, GraphError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(GraphError::TransactionFinished(state));
        }
        self.session
            .submit(Some(&self.shared), statement, params, bindings)
            .await
    }

    /// Reads the remainder of every result, commits and returns the
    /// server's bookmark, if any.
    pub async fn commit(&self) -> Result<Option<String>, GraphError> {
        let outcome = self.session.channel().commit(&self.shared).await;
        match &outcome {
            Ok(_) => tracing::debug!(session = %self.session.id(), "transaction committed"),
            Err(err) => tracing::debug!(session = %self.session.id(), error = %err, "commit failed"),
        }
        outcome
    }

    /// Discards unread rows and rolls back. Also accepted after a failure.
    pub async fn rollback(&self) -> Result<(), GraphError> {
        self.session.channel().rollback(&self.shared).await?;
        tracing::debug!(session = %self.session.id(), "transaction rolled back");
        Ok(())
    }

    /// Creates the unbound parts of `object` and binds them to their new
    /// identities.
    pub async fn create<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        object.db_create(self).await
    }

    /// Merges `object` on `primary_label`/`primary_key`. When they are
    /// omitted, each node's first label and every property are used.
    pub async fn merge<O: GraphObject + ?Sized>(
        &self,
        object: &O,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<(), GraphError> {
        object.db_merge(self, primary_label, primary_key).await
    }

    /// Deletes the bound parts of `object` and unbinds them.
    pub async fn delete<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        object.db_delete(self).await
    }

    /// Refreshes the bound parts of `object` from the server.
    pub async fn pull<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        object.db_pull(self).await
    }

    /// Writes local properties and labels of the bound parts of `object`.
    pub async fn push<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        object.db_push(self).await
    }

    /// True when every part of `object` is bound and still on the server.
    pub async fn exists<O: GraphObject + ?Sized>(&self, object: &O) -> Result<bool, GraphError> {
        object.db_exists(self).await
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(self.state(), TxState::Open | TxState::Failed) {
            self.session.channel().abandon_tx(&self.shared);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("session", &self.session.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testkit::{Script, StubConnector, done, header_qid, ok, records, then_done};
    use crate::message::ServerMessage;

    #[test]
    fn terminal_states() {
        assert!(!TxState::Pending.is_terminal());
        assert!(!TxState::Open.is_terminal());
        assert!(TxState::Committed.is_terminal());
        assert!(TxState::RolledBack.is_terminal());
        assert!(TxState::Failed.is_terminal());
        assert_eq!(TxState::RolledBack.to_string(), "rolled back");
    }

    #[test]
    fn first_failure_is_kept() {
        let tx = TxInner::new();
        let mut t = tx.lock();
        t.state = TxState::Open;
        t.fail(GraphError::Protocol("first".into()));
        t.fail(GraphError::Protocol("second".into()));
        assert_eq!(t.state, TxState::Failed);
        assert!(matches!(&t.error, Some(GraphError::Protocol(m)) if m == "first"));
    }

    #[test]
    fn committed_transaction_cannot_fail() {
        let tx = TxInner::new();
        let mut t = tx.lock();
        t.state = TxState::Committed;
        t.fail(GraphError::Protocol("late".into()));
        assert_eq!(t.state, TxState::Committed);
        assert!(t.error.is_none());
    }

    #[test]
    fn tracked_results_are_weak() {
        let tx = TxInner::new();
        let kept = ResultState::new(1, Bindings::new());
        let dropped = ResultState::new(2, Bindings::new());
        tx.lock().track(&kept);
        tx.lock().track(&dropped);
        drop(dropped);
        let live = tx.lock().results();
        assert_eq!(live.len(), 1);
        assert!(Arc::ptr_eq(&live[0], &kept));
    }

    fn session(stub: &Arc<StubConnector>) -> Session {
        Session::bolt(stub.clone(), Arc::new(Config::new()))
    }

    fn constraint_failure() -> ServerMessage {
        ServerMessage::failure("Neo.ClientError.Schema.ConstraintValidationFailed", "exists")
    }

    #[tokio::test]
    async fn failure_invalidates_the_whole_transaction() {
        let stub = StubConnector::new([Script::new()
            .on("BEGIN", [ok()])
            .on("RUN", [header_qid(&["n"], 0)])
            .on("PULL", then_done(records(1..=1)))
            .on("RUN", [constraint_failure()])
            .on("PULL", [ServerMessage::Ignored])
            .on("RUN", [ServerMessage::Ignored])
            .on("PULL", [ServerMessage::Ignored])
            .on("RESET", [ok()])]);
        let session = session(&stub);
        let tx = session.begin().unwrap();
        let mut first = tx.run("CREATE (a:A) RETURN 1 AS n", Params::new()).await.unwrap();
        let mut second = tx.run("CREATE (:Unique {k: 1})", Params::new()).await.unwrap();
        let mut third = tx.run("CREATE (c:C) RETURN c", Params::new()).await.unwrap();

        assert_eq!(first.result_mut().fetch_all().await.unwrap().len(), 1);
        assert!(matches!(second.next().await, Err(GraphError::Client { .. })));
        assert!(matches!(third.next().await, Err(GraphError::Client { .. })));
        assert_eq!(tx.state(), TxState::Failed);
        assert!(matches!(
            tx.run("RETURN 1", Params::new()).await,
            Err(GraphError::TransactionFinished(TxState::Failed))
        ));

        tx.rollback().await.unwrap();
        assert_eq!(tx.state(), TxState::RolledBack);
        assert!(!stub.names().contains(&"COMMIT"));
        assert_eq!(stub.names().last(), Some(&"RESET"));
        assert!(stub.violations().is_empty(), "{:?}", stub.violations());
    }

    #[tokio::test]
    async fn committed_transaction_is_final() {
        let stub = StubConnector::new([Script::new()
            .on("BEGIN", [ok()])
            .on("RUN", [header_qid(&["n"], 0)])
            .on("PULL", then_done(records(5..=5)))
            .on("COMMIT", [ok()])]);
        let session = session(&stub);
        let tx = session.begin().unwrap();
        let mut cursor = tx.run("RETURN 5 AS n", Params::new()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(tx.state(), TxState::Committed);
        let row = cursor.next().await.unwrap().unwrap();
        assert_eq!(row.get("n").and_then(Value::as_i64), Some(5));
        assert!(matches!(
            tx.run("RETURN 1", Params::new()).await,
            Err(GraphError::TransactionFinished(TxState::Committed))
        ));
        assert!(matches!(tx.commit().await, Err(GraphError::TransactionFinished(_))));
        assert!(matches!(tx.rollback().await, Err(GraphError::TransactionFinished(_))));
        assert!(stub.violations().is_empty(), "{:?}", stub.violations());
    }

    #[tokio::test]
    async fn unused_transaction_sends_nothing() {
        let stub = StubConnector::new([]);
        let session = session(&stub);
        let tx = session.begin().unwrap();
        assert_eq!(tx.state(), TxState::Pending);
        assert_eq!(tx.commit().await.unwrap(), None);
        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(stub.connects(), 0);
    }

    #[tokio::test]
    async fn one_open_transaction_per_session() {
        let stub = StubConnector::new([Script::new()
            .on("BEGIN", [ok()])
            .on("RUN", [header_qid(&["n"], 0)])
            .on("PULL", [done()])
            .on("ROLLBACK", [ok()])]);
        let session = session(&stub);
        let tx = session.begin().unwrap();
        assert!(matches!(session.begin(), Err(GraphError::Session(_))));

        let mut cursor = tx.run("MATCH (n) RETURN n", Params::new()).await.unwrap();
        assert!(cursor.next().await.unwrap().is_none());
        assert!(matches!(
            session.run("RETURN 1", Params::new()).await,
            Err(GraphError::Session(_))
        ));

        tx.rollback().await.unwrap();
        assert!(session.begin().is_ok());
    }

    #[tokio::test]
    async fn dropped_transaction_is_reset_before_the_next_statement() {
        let stub = StubConnector::new([Script::new()
            .on("BEGIN", [ok()])
            .on("RUN", [header_qid(&["n"], 0)])
            .on("PULL", then_done(records(1..=1)))
            .on("RESET", [ok()])
            .on("RUN", [crate::testkit::header(&["n"])])
            .on("PULL", then_done(records(2..=2)))]);
        let session = session(&stub);
        {
            let tx = session.begin().unwrap();
            let value = tx.evaluate("RETURN 1 AS n", Params::new()).await.unwrap();
            assert_eq!(value.and_then(|v| v.as_i64()), Some(1));
        }

        let value = session.evaluate("RETURN 2 AS n", Params::new()).await.unwrap();
        assert_eq!(value.and_then(|v| v.as_i64()), Some(2));
        assert_eq!(stub.names(), ["BEGIN", "RUN", "PULL", "RESET", "RUN", "PULL"]);
        assert!(stub.violations().is_empty(), "{:?}", stub.violations());
    }
}
