//! Forward-only navigation over a result.

use std::collections::HashMap;

use super::{Counters, Field, Plan, QueryResult, Record, Summary};
use crate::error::GraphError;
use crate::hydrate::Value;

/// A position in a [`QueryResult`].
///
/// The cursor starts before the first record. [`forward`](Self::forward)
/// moves it; [`current`](Self::current) reads where it stands. Once the
/// end is reached every further move returns 0.
#[derive(Debug)]
pub struct Cursor {
    result: QueryResult,
    current: Option<Record>,
    exhausted: bool,
}

impl Cursor {
    pub fn new(result: QueryResult) -> Self {
        Self {
            result,
            current: None,
            exhausted: false,
        }
    }

    pub async fn keys(&self) -> Result<Vec<String>, GraphError> {
        self.result.keys().await
    }

    /// Moves up to `amount` records ahead and returns how far it got.
    pub async fn forward(&mut self, amount: usize) -> Result<usize, GraphError> {
        let mut moved = 0;
        while moved < amount && !self.exhausted {
            match self.result.fetch_next().await? {
                Some(record) => {
                    self.current = Some(record);
                    moved += 1;
                }
                None => {
                    self.current = None;
                    self.exhausted = true;
                }
            }
        }
        Ok(moved)
    }

    /// The record at the current position.
    pub fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    /// Moves one record ahead and returns it.
    #[allow(clippy::should_implement_trait)]
    pub async fn next(&mut self) -> Result<Option<Record>, GraphError> {
        Ok(match self.forward(1).await? {
            0 => None,
            _ => self.current.clone(),
        })
    }

    /// Moves one record ahead and returns one of its fields; `None` if the
    /// cursor is exhausted or the record has no such field.
    pub async fn evaluate(&mut self, field: impl Into<Field>) -> Result<Option<Value>, GraphError> {
        let field = field.into();
        if self.forward(1).await? == 0 {
            return Ok(None);
        }
        Ok(self.current.as_ref().and_then(|r| r.field(&field)).cloned())
    }

    /// Mappings of every remaining record. Duplicate column names keep their
    /// first value.
    pub async fn data(&mut self) -> Result<Vec<HashMap<String, Value>>, GraphError> {
        let mut rows = Vec::new();
        while let Some(record) = self.next().await? {
            rows.push(record.data());
        }
        Ok(rows)
    }

    /// Summary of the whole result. Buffers unread records without
    /// consuming them.
    pub async fn summary(&self) -> Result<Summary, GraphError> {
        self.result.summary().await
    }

    pub async fn stats(&self) -> Result<Counters, GraphError> {
        Ok(self.summary().await?.counters)
    }

    pub async fn plan(&self) -> Result<Option<Plan>, GraphError> {
        Ok(self.summary().await?.plan)
    }

    /// Abandons the remaining records.
    pub async fn close(&mut self) -> Result<(), GraphError> {
        self.exhausted = true;
        self.current = None;
        self.result.close().await
    }

    /// The underlying result, for bulk reads.
    pub fn result_mut(&mut self) -> &mut QueryResult {
        &mut self.result
    }

    pub fn into_result(self) -> QueryResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::hydrate::{Params, Value};
    use crate::session::Session;
    use crate::testkit::{Script, StubConnector, header, records, then_done};

    #[tokio::test]
    async fn evaluate_is_none_past_the_end_or_for_a_missing_field() {
        let stub = StubConnector::new([Script::new()
            .on("RUN", [header(&["n"])])
            .on("PULL", then_done(records(1..=2)))]);
        let session = Session::bolt(stub.clone(), Arc::new(Config::new()));
        let mut cursor = session.run("UNWIND [1, 2] AS n RETURN n", Params::new()).await.unwrap();

        assert_eq!(cursor.evaluate("n").await.unwrap(), Some(Value::Integer(1)));
        assert_eq!(cursor.evaluate("missing").await.unwrap(), None);
        assert!(cursor.current().is_some());
        assert_eq!(cursor.evaluate(0).await.unwrap(), None);
        assert!(cursor.current().is_none());
        assert_eq!(cursor.evaluate("n").await.unwrap(), None);
    }
}
