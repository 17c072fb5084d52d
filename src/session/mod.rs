//! Sessions: one channel, one entity cache, at most one open transaction.

mod channel;
mod dispatcher;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

pub(crate) use channel::Channel;
pub(crate) use dispatcher::Dispatcher;

use crate::config::{Config, Endpoint};
use crate::connection::Connector;
use crate::error::GraphError;
use crate::http::HttpChannel;
use crate::hydrate::{Bindings, EntityCache, Params, Value};
use crate::result::{Cursor, QueryResult};
use crate::tx::presub::presubstitute;
use crate::tx::{Transaction, TxInner, TxState};

struct SessionInner {
    id: Uuid,
    channel: Arc<dyn Channel>,
    cache: EntityCache,
    config: Arc<Config>,
    active_tx: Mutex<Weak<Mutex<TxInner>>>,
}

/// A logical sequence of statements and transactions over one channel.
///
/// Clones share the channel, the entity cache and the transaction slot.
/// A session is meant to be used by one task at a time; open another for
/// concurrent work.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// A session speaking Bolt over connections made by `connector`. The
    /// connection is opened on first use.
    pub fn bolt(connector: Arc<dyn Connector>, config: Arc<Config>) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, target = %connector.target(), "bolt session created");
        let channel = Arc::new(Dispatcher::new(id, connector, config.clone()));
        Self::with_channel(id, channel, EntityCache::new(), config)
    }

    /// A session over the transactional HTTP endpoint of `endpoint`.
    pub fn http(endpoint: &Endpoint, config: Arc<Config>) -> Result<Self, GraphError> {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, endpoint = %endpoint, "http session created");
        let cache = EntityCache::new();
        let channel = Arc::new(HttpChannel::new(id, endpoint, config.clone(), cache.clone())?);
        Ok(Self::with_channel(id, channel, cache, config))
    }

    pub(crate) fn with_channel(
        id: Uuid,
        channel: Arc<dyn Channel>,
        cache: EntityCache,
        config: Arc<Config>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                channel,
                cache,
                config,
                active_tx: Mutex::new(Weak::new()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The identity map shared by everything hydrated in this session.
    pub fn cache(&self) -> &EntityCache {
        &self.inner.cache
    }

    /// Forgets every cached entity. Proxies already handed out stay valid
    /// but are no longer updated by later results.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub(crate) fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.channel
    }

    /// Runs `statement` as an autocommit transaction and waits for its
    /// header, so that a rejected statement fails here.
    pub async fn run(&self, statement: &str, params: Params) -> Result<Cursor, GraphError> {
        if let Some(state) = self.active_state() {
            if state == TxState::Open {
                return Err(GraphError::Session(
                    "cannot run an autocommit statement while a transaction is open".into(),
                ));
            }
        }
        let result = self.submit(None, statement, params, Bindings::new()).await?;
        result.keys().await?;
        Ok(Cursor::new(result))
    }

    /// Runs `statement` and returns the first field of its first record.
    pub async fn evaluate(&self, statement: &str, params: Params) -> Result<Option<Value>, GraphError> {
        self.run(statement, params).await?.evaluate(0).await
    }

    /// Starts an explicit transaction. Nothing is sent until its first
    /// statement.
    pub fn begin(&self) -> Result<Transaction, GraphError> {
        let mut slot = self.inner.active_tx.lock();
        if let Some(active) = slot.upgrade() {
            let state = active.lock().state;
            if !state.is_terminal() {
                return Err(GraphError::Session(format!(
                    "a transaction is already {state} in this session"
                )));
            }
        }
        let shared = TxInner::new();
        *slot = Arc::downgrade(&shared);
        tracing::debug!(session = %self.inner.id, "transaction started");
        Ok(Transaction::new(self.clone(), shared))
    }

    /// Sends everything queued and waits for every response.
    pub async fn sync(&self) -> Result<(), GraphError> {
        self.inner.channel.sync().await
    }

    /// Fails outstanding results and releases the connection. A later
    /// statement opens a new one.
    pub async fn close(&self) {
        tracing::debug!(session = %self.inner.id, "closing session");
        self.inner.channel.close().await;
    }

    pub(crate) async fn submit(
        &self,
        tx: Option<&crate::tx::SharedTx>,
        statement: &str,
        mut params: Params,
        bindings: Bindings,
    ) -> Result<QueryResult, GraphError> {
        let statement = presubstitute(statement, &mut params)?;
        tracing::debug!(session = %self.inner.id, statement = %statement, explicit = tx.is_some(), "run");
        let state = self
            .inner
            .channel
            .run(tx, statement, params, bindings)
            .await?;
        Ok(QueryResult::new(
            state,
            self.inner.channel.clone(),
            self.inner.cache.clone(),
            self.inner.config.lenient_hydration,
            self.inner.config.fetch_size,
        ))
    }

    fn active_state(&self) -> Option<TxState> {
        let active = self.inner.active_tx.lock().upgrade()?;
        let state = active.lock().state;
        Some(state)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}
