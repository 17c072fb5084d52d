//! Forward-only, lazily hydrated statement results.

pub mod cursor;
mod record;
pub(crate) mod state;
mod summary;

use std::sync::Arc;

pub use cursor::Cursor;
pub use record::{Field, Record};
pub use summary::{Counters, Plan, Summary};

use crate::error::GraphError;
use crate::hydrate::{EntityCache, Hydrator};
use crate::session::Channel;
use state::{Goal, Row, SharedResult};

/// The output of one statement.
///
/// Rows are requested from the server as they are read: in batches of the
/// session's fetch size through [`fetch_next`](Self::fetch_next), or in
/// caller-chosen amounts through [`pull`](Self::pull). Dropping a result
/// before its end tells the server to discard the remaining rows.
pub struct QueryResult {
    state: SharedResult,
    channel: Arc<dyn Channel>,
    cache: EntityCache,
    lenient: bool,
    fetch_size: i64,
    deferred: Option<GraphError>,
}

impl QueryResult {
    pub(crate) fn new(
        state: SharedResult,
        channel: Arc<dyn Channel>,
        cache: EntityCache,
        lenient: bool,
        fetch_size: i64,
    ) -> Self {
        Self {
            state,
            channel,
            cache,
            lenient,
            fetch_size,
            deferred: None,
        }
    }

    /// Field names, waiting for the header if needed.
    pub async fn keys(&self) -> Result<Vec<String>, GraphError> {
        self.channel.advance(&self.state, Goal::Keys).await?;
        let st = self.state.lock();
        match (&st.keys, &st.error) {
            (Some(keys), _) => Ok(keys.to_vec()),
            (None, Some(err)) => Err(err.clone()),
            (None, None) => Ok(Vec::new()),
        }
    }

    /// Returns the next record, `None` at the end of the stream, or the
    /// error that ended it. A stream error is raised once; later calls
    /// return `None`. A row that cannot be hydrated fails on its own and
    /// the next call moves on.
    pub async fn fetch_next(&mut self) -> Result<Option<Record>, GraphError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        loop {
            if let Some(next) = self.take_buffered() {
                return next;
            }
            let goal = Goal::Rows {
                want: 1,
                batch: self.fetch_size,
            };
            self.channel.advance(&self.state, goal).await?;
        }
    }

    /// Reads up to `n` further records, asking the server for exactly what
    /// is missing. Returns fewer at the end of the stream and an empty list
    /// once exhausted.
    pub async fn pull(&mut self, n: usize) -> Result<Vec<Record>, GraphError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        let mut records = Vec::with_capacity(n);
        while records.len() < n {
            match self.take_buffered() {
                Some(Ok(Some(record))) => records.push(record),
                Some(Ok(None)) => break,
                Some(Err(err)) if records.is_empty() => return Err(err),
                Some(Err(err)) => {
                    self.deferred = Some(err);
                    break;
                }
                None => {
                    let missing = n - records.len();
                    let goal = Goal::Rows {
                        want: 1,
                        batch: i64::try_from(missing).unwrap_or(-1),
                    };
                    self.channel.advance(&self.state, goal).await?;
                }
            }
        }
        Ok(records)
    }

    /// Reads every remaining record.
    pub async fn fetch_all(&mut self) -> Result<Vec<Record>, GraphError> {
        self.channel.advance(&self.state, Goal::End).await?;
        let mut records = Vec::new();
        while let Some(record) = self.fetch_next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Buffers the rest of the stream and returns its summary. Buffered rows
    /// remain readable afterwards.
    pub async fn summary(&self) -> Result<Summary, GraphError> {
        self.channel.advance(&self.state, Goal::End).await?;
        let st = self.state.lock();
        if let (None, Some(err)) = (&st.keys, &st.error) {
            return Err(err.clone());
        }
        Ok(Summary::from_metadata(&st.header, &st.footer))
    }

    /// Discards the unread remainder and waits until the server has dropped it.
    pub async fn close(&mut self) -> Result<(), GraphError> {
        self.channel.abandon(&self.state);
        self.channel.advance(&self.state, Goal::End).await?;
        self.state.lock().rows.clear();
        Ok(())
    }

    /// True once the stream has ended and every buffered row was read.
    pub fn is_exhausted(&self) -> bool {
        let st = self.state.lock();
        st.is_terminal() && st.rows.is_empty() && (st.error.is_none() || st.error_raised)
    }

    /// Next buffered row or terminal outcome; `None` means more must be read.
    fn take_buffered(&mut self) -> Option<Result<Option<Record>, GraphError>> {
        let mut st = self.state.lock();
        if let Some(row) = st.rows.pop_front() {
            let keys = st.keys.clone().unwrap_or_else(|| Arc::from(Vec::new()));
            let values = match row {
                Row::Ready(values) => values,
                Row::Wire(raw) => Hydrator::new(&self.cache)
                    .with_bindings(&st.bindings)
                    .lenient(self.lenient)
                    .hydrate_row(&keys, raw),
            };
            return Some(values.map(|v| Some(Record::new(keys, v))));
        }
        if st.is_terminal() {
            return Some(match st.take_error() {
                Some(err) => Err(err),
                None => Ok(None),
            });
        }
        None
    }
}

impl Drop for QueryResult {
    fn drop(&mut self) {
        if !self.state.lock().is_terminal() {
            self.channel.abandon(&self.state);
        }
    }
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("QueryResult")
            .field("seq", &st.seq)
            .field("keys", &st.keys)
            .field("status", &st.status)
            .field("buffered", &st.rows.len())
            .finish()
    }
}
