//! The transactional HTTP endpoint as a session channel.
//!
//! Autocommit statements are posted one at a time. Statements of an explicit
//! transaction are queued and posted together when one of their results is
//! first read, when the session syncs, or with the commit.

mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use uuid::Uuid;

use crate::config::{AuthToken, Config, Endpoint};
use crate::error::GraphError;
use crate::hydrate::{Bindings, EntityCache, Hydrator, Params};
use crate::result::state::{Goal, ResultState, Row, SharedResult};
use crate::session::Channel;
use crate::tx::{SharedTx, TxState};
use rest::{RestHydrator, Statement, StatementBatch, TxResponse};

const TX_PATH: &str = "/db/data/transaction";

struct Queued {
    statement: Statement,
    result: SharedResult,
}

#[derive(Default)]
struct Batch {
    tx: Option<SharedTx>,
    statements: Vec<Queued>,
}

/// Executes statements through `/db/data/transaction`.
pub(crate) struct HttpChannel {
    session_id: Uuid,
    client: Client,
    base: String,
    auth: AuthToken,
    cache: EntityCache,
    config: Arc<Config>,
    batch: Mutex<Batch>,
    io: tokio::sync::Mutex<()>,
}

impl HttpChannel {
    pub(crate) fn new(
        session_id: Uuid,
        endpoint: &Endpoint,
        config: Arc<Config>,
        cache: EntityCache,
    ) -> Result<Self, GraphError> {
        let mut builder = ClientBuilder::new().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = config.read_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            session_id,
            client: builder.build()?,
            base: endpoint.http_base(),
            auth: config.auth.clone(),
            cache,
            config,
            batch: Mutex::new(Batch::default()),
            io: tokio::sync::Mutex::new(()),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> GraphError {
        match self.config.read_timeout {
            Some(timeout) if err.is_timeout() => GraphError::Timeout(timeout),
            _ => GraphError::from(err),
        }
    }

    /// Sends one request and decodes the transactional response body.
    /// Returns the `Location` header alongside it.
    async fn exchange(
        &self,
        method: Method,
        url: &str,
        statements: &[Statement],
    ) -> Result<(TxResponse, Option<String>), GraphError> {
        tracing::debug!(session = %self.session_id, %method, url, statements = statements.len(), "C: HTTP");
        let mut request = self.client.request(method.clone(), url);
        if method != Method::DELETE {
            request = request.json(&StatementBatch { statements });
        }
        if let AuthToken::Basic { user, password } = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        tracing::debug!(session = %self.session_id, %status, bytes = body.len(), "S: HTTP");
        if body.is_empty() {
            return if status.is_success() {
                Ok((TxResponse::default(), location))
            } else {
                Err(GraphError::Http(format!("{status} from {url}")))
            };
        }
        match serde_json::from_slice::<TxResponse>(&body) {
            Ok(parsed) => Ok((parsed, location)),
            Err(_) if !status.is_success() => Err(GraphError::Http(format!("{status} from {url}"))),
            Err(e) => Err(e.into()),
        }
    }

    /// Fills each queued result from the response. A reported error fails
    /// every result of the batch.
    fn apply(&self, response: TxResponse, queued: Vec<Queued>) -> Result<(), GraphError> {
        if let Some(first) = response.errors.first() {
            let err = GraphError::from(first);
            tracing::debug!(session = %self.session_id, error = %err, "batch failed");
            for q in queued {
                q.result.lock().fail(err.clone());
            }
            return Err(err);
        }
        let mut results = response.results.into_iter();
        for q in queued {
            let Some(result) = results.next() else {
                q.result
                    .lock()
                    .fail(GraphError::Protocol("fewer results than statements".into()));
                continue;
            };
            let mut st = q.result.lock();
            let hydrator = RestHydrator::new(Hydrator::new(&self.cache).lenient(self.config.lenient_hydration));
            let rows = result
                .data
                .iter()
                .map(|row| Row::Ready(hydrator.row(&result.columns, &row.rest, &st.bindings)))
                .collect();
            let footer = rest::footer(&result);
            st.complete(result.columns, rows, footer);
        }
        Ok(())
    }

    /// Posts the queued statements of the open transaction.
    async fn flush(&self) -> Result<(), GraphError> {
        let _io = self.io.lock().await;
        let (tx, queued) = {
            let mut batch = self.batch.lock();
            if batch.statements.is_empty() {
                return Ok(());
            }
            let Some(tx) = batch.tx.clone() else {
                return Err(GraphError::Protocol("statements queued outside a transaction".into()));
            };
            (tx, std::mem::take(&mut batch.statements))
        };
        let statements: Vec<Statement> = queued.iter().map(|q| q.statement.clone()).collect();
        let location = tx.lock().location.clone();
        let url = location.clone().unwrap_or_else(|| format!("{}{TX_PATH}", self.base));

        let outcome = self
            .exchange(Method::POST, &url, &statements)
            .await
            .and_then(|(response, new_location)| {
                if location.is_none() {
                    let new_location = new_location
                        .ok_or_else(|| GraphError::Protocol("transaction begun without a Location".into()))?;
                    tx.lock().location = Some(new_location);
                }
                Ok(response)
            });
        match outcome {
            Ok(response) => self.apply(response, queued).or_else(|err| {
                self.release(&tx);
                tx.lock().fail(err);
                Ok(())
            }),
            Err(err) => {
                for q in &queued {
                    q.result.lock().fail(err.clone());
                }
                self.release(&tx);
                tx.lock().fail(err.clone());
                Err(err)
            }
        }
    }

    /// Forgets the batch of `tx`, which is no longer held by the server.
    fn release(&self, tx: &SharedTx) {
        let mut batch = self.batch.lock();
        if batch.tx.as_ref().is_some_and(|t| Arc::ptr_eq(t, tx)) {
            batch.tx = None;
            for q in batch.statements.drain(..) {
                q.result.lock().truncate();
            }
        }
    }

    fn is_queued(&self, result: &SharedResult) -> bool {
        self.batch
            .lock()
            .statements
            .iter()
            .any(|q| Arc::ptr_eq(&q.result, result))
    }
}

fn json_params(params: &Params) -> Result<serde_json::Map<String, serde_json::Value>, GraphError> {
    params
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
        .collect()
}

#[async_trait]
impl Channel for HttpChannel {
    async fn run(
        &self,
        tx: Option<&SharedTx>,
        statement: String,
        params: Params,
        bindings: Bindings,
    ) -> Result<SharedResult, GraphError> {
        let statement = Statement::new(statement, json_params(&params)?);
        let result = ResultState::new(0, bindings);

        let Some(tx) = tx else {
            let _io = self.io.lock().await;
            let url = format!("{}{TX_PATH}/commit", self.base);
            match self.exchange(Method::POST, &url, std::slice::from_ref(&statement)).await {
                Ok((response, _)) => {
                    let queued = vec![Queued {
                        statement,
                        result: result.clone(),
                    }];
                    // The failure is delivered through the result.
                    let _ = self.apply(response, queued);
                }
                Err(err) => result.lock().fail(err),
            }
            return Ok(result);
        };

        let mut batch = self.batch.lock();
        let mut t = tx.lock();
        match t.state {
            TxState::Pending => t.state = TxState::Open,
            TxState::Open => {}
            state => return Err(GraphError::TransactionFinished(state)),
        }
        t.track(&result);
        batch.tx = Some(tx.clone());
        batch.statements.push(Queued {
            statement,
            result: result.clone(),
        });
        Ok(result)
    }

    async fn advance(&self, result: &SharedResult, goal: Goal) -> Result<(), GraphError> {
        if result.lock().satisfies(goal) {
            return Ok(());
        }
        if self.is_queued(result) {
            self.flush().await?;
        }
        if !result.lock().is_terminal() {
            return Err(GraphError::Protocol("result is not in flight".into()));
        }
        Ok(())
    }

    fn abandon(&self, result: &SharedResult) {
        let mut st = result.lock();
        st.discarded = true;
        st.rows.clear();
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

        let _io = self.io.lock().await;
        let queued = std::mem::take(&mut self.batch.lock().statements);
        let statements: Vec<Statement> = queued.iter().map(|q| q.statement.clone()).collect();
        let url = match tx.lock().location.clone() {
            Some(location) => format!("{location}/commit"),
            None => format!("{}{TX_PATH}/commit", self.base),
        };
        let outcome = match self.exchange(Method::POST, &url, &statements).await {
            Ok((response, _)) => self.apply(response, queued),
            Err(err) => {
                for q in &queued {
                    q.result.lock().fail(err.clone());
                }
                Err(err)
            }
        };
        self.release(tx);
        let mut t = tx.lock();
        match outcome {
            Ok(()) => {
                t.state = TxState::Committed;
                Ok(None)
            }
            Err(err) => {
                t.fail(err.clone());
                Err(err)
            }
        }
    }

    async fn rollback(&self, tx: &SharedTx) -> Result<(), GraphError> {
        let state = tx.lock().state;
        match state {
            TxState::Pending | TxState::Failed => {
                self.release(tx);
                tx.lock().state = TxState::RolledBack;
                return Ok(());
            }
            TxState::Open => {}
            state => return Err(GraphError::TransactionFinished(state)),
        }
        let _io = self.io.lock().await;
        self.release(tx);
        for r in tx.lock().results() {
            let mut st = r.lock();
            st.discarded = true;
            st.rows.clear();
        }
        let location = tx.lock().location.clone();
        let outcome = match location {
            Some(url) => self.exchange(Method::DELETE, &url, &[]).await.map(|_| ()),
            None => Ok(()),
        };
        tx.lock().state = TxState::RolledBack;
        outcome
    }

    fn abandon_tx(&self, tx: &SharedTx) {
        self.release(tx);
        let location = {
            let mut t = tx.lock();
            t.state = TxState::RolledBack;
            t.location.take()
        };
        let Some(url) = location else { return };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session = %self.session_id, url, "no runtime to roll back abandoned transaction");
            return;
        };
        let mut request = self.client.delete(&url);
        if let AuthToken::Basic { user, password } = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let session = self.session_id;
        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status() == StatusCode::OK => {}
                Ok(response) => tracing::debug!(%session, status = %response.status(), "rollback of abandoned transaction"),
                Err(err) => tracing::debug!(%session, error = %err, "rollback of abandoned transaction"),
            }
        });
    }

    async fn sync(&self) -> Result<(), GraphError> {
        self.flush().await
    }

    async fn close(&self) {
        let tx = self.batch.lock().tx.clone();
        if let Some(tx) = tx {
            for q in self.batch.lock().statements.drain(..) {
                q.result.lock().fail(GraphError::Session("session closed".into()));
            }
            self.abandon_tx(&tx);
        }
    }
}
