//! The seam between sessions and the transport that executes statements.

use async_trait::async_trait;

use crate::error::GraphError;
use crate::hydrate::{Bindings, Params};
use crate::result::state::{Goal, SharedResult};
use crate::tx::SharedTx;

/// Executes statements for one session and feeds their result streams.
///
/// Implemented by the Bolt [`Dispatcher`](super::Dispatcher) and the HTTP
/// channel. Only a channel reads or writes protocol messages.
#[async_trait]
pub(crate) trait Channel: Send + Sync + 'static {
    /// Submits a statement, inside `tx` or as autocommit when `tx` is `None`,
    /// and returns its stream state.
    async fn run(
        &self,
        tx: Option<&SharedTx>,
        statement: String,
        params: Params,
        bindings: Bindings,
    ) -> Result<SharedResult, GraphError>;

    /// Makes progress until `result` satisfies `goal` or ends.
    async fn advance(&self, result: &SharedResult, goal: Goal) -> Result<(), GraphError>;

    /// Marks `result` as abandoned so its remaining rows are discarded.
    /// Must not block; called from `Drop`.
    fn abandon(&self, result: &SharedResult);

    /// Completes every open result of `tx`, then commits it. Returns the
    /// bookmark, if the server sent one.
    async fn commit(&self, tx: &SharedTx) -> Result<Option<String>, GraphError>;

    /// Discards every open result of `tx`, then rolls it back.
    async fn rollback(&self, tx: &SharedTx) -> Result<(), GraphError>;

    /// Rolls back `tx` without waiting, after its handle was dropped.
    fn abandon_tx(&self, tx: &SharedTx);

    /// Sends everything queued and waits for all responses.
    async fn sync(&self) -> Result<(), GraphError>;

    /// Fails outstanding work and releases the transport.
    async fn close(&self);
}
