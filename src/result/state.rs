//! Shared state of one statement's stream, written by a channel and read by
//! the [`QueryResult`](super::QueryResult) handle.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GraphError;
use crate::hydrate::{Bindings, Value};
use crate::message::request::LAST_QUERY;
use crate::types::{BoltDict, BoltValue};

pub(crate) type SharedResult = Arc<Mutex<ResultState>>;

/// A buffered row: raw from Bolt, or already hydrated (HTTP).
#[derive(Debug)]
pub(crate) enum Row {
    Wire(Vec<BoltValue>),
    Ready(Result<Vec<Value>, GraphError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// Statement submitted, header not yet received.
    RunPending,
    /// Header received; rows may still be held by the server.
    Streaming,
    Done,
    Failed,
}

/// What a reader is waiting for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Goal {
    Keys,
    /// At least `want` buffered rows, requesting `batch` rows per PULL.
    Rows { want: usize, batch: i64 },
    /// Everything buffered.
    End,
}

#[derive(Debug)]
pub(crate) struct ResultState {
    /// Correlation sequence number of the RUN request.
    pub(crate) seq: u64,
    pub(crate) keys: Option<Arc<[String]>>,
    pub(crate) qid: i64,
    pub(crate) rows: VecDeque<Row>,
    pub(crate) status: Status,
    /// The server holds rows that have not been pulled yet.
    pub(crate) has_more: bool,
    pub(crate) pull_in_flight: bool,
    pub(crate) error: Option<GraphError>,
    pub(crate) error_raised: bool,
    pub(crate) header: BoltDict,
    pub(crate) footer: BoltDict,
    /// The reader gave up; remaining rows are dropped.
    pub(crate) discarded: bool,
    /// The server-side stream is going away with its transaction.
    pub(crate) detached: bool,
    pub(crate) bindings: Bindings,
}

impl ResultState {
    pub(crate) fn new(seq: u64, bindings: Bindings) -> SharedResult {
        Arc::new(Mutex::new(Self {
            seq,
            keys: None,
            qid: LAST_QUERY,
            rows: VecDeque::new(),
            status: Status::RunPending,
            has_more: false,
            pull_in_flight: false,
            error: None,
            error_raised: false,
            header: BoltDict::new(),
            footer: BoltDict::new(),
            discarded: false,
            detached: false,
            bindings,
        }))
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Done | Status::Failed)
    }

    /// Whether a PULL or DISCARD may be sent for this stream now.
    pub(crate) fn idle_with_more(&self) -> bool {
        self.status == Status::Streaming && self.has_more && !self.pull_in_flight
    }

    pub(crate) fn satisfies(&self, goal: Goal) -> bool {
        if self.is_terminal() {
            return true;
        }
        match goal {
            Goal::Keys => self.keys.is_some(),
            Goal::Rows { want, .. } => self.rows.len() >= want,
            Goal::End => false,
        }
    }

    pub(crate) fn on_header(&mut self, metadata: BoltDict) {
        let keys: Vec<String> = metadata
            .get("fields")
            .and_then(BoltValue::as_list)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        self.set_keys(keys);
        if let Some(qid) = metadata.get("qid").and_then(BoltValue::as_int) {
            self.qid = qid;
        }
        self.header = metadata;
        if self.status == Status::RunPending {
            self.status = Status::Streaming;
            self.has_more = true;
        }
    }

    pub(crate) fn set_keys(&mut self, keys: Vec<String>) {
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                tracing::warn!(
                    seq = self.seq,
                    key = %key,
                    "duplicate column name; lookup by name returns the first"
                );
            }
        }
        self.keys = Some(keys.into());
    }

    pub(crate) fn push_row(&mut self, row: Row) {
        if !self.discarded {
            self.rows.push_back(row);
        }
    }

    /// Applies a PULL summary. Returns true if a DISCARD should follow.
    pub(crate) fn on_pull_success(&mut self, metadata: BoltDict) -> bool {
        self.pull_in_flight = false;
        self.has_more = metadata
            .get("has_more")
            .and_then(BoltValue::as_bool)
            .unwrap_or(false);
        if self.has_more {
            if self.detached {
                self.status = Status::Done;
                return false;
            }
            return self.discarded;
        }
        self.footer = metadata;
        self.status = Status::Done;
        false
    }

    pub(crate) fn on_discard_success(&mut self, metadata: BoltDict) {
        self.pull_in_flight = false;
        self.has_more = false;
        self.footer = metadata;
        self.status = Status::Done;
    }

    /// Delivers a whole result at once, for transports without streaming.
    pub(crate) fn complete(&mut self, keys: Vec<String>, rows: Vec<Row>, footer: BoltDict) {
        if self.is_terminal() {
            return;
        }
        self.set_keys(keys);
        for row in rows {
            self.push_row(row);
        }
        self.footer = footer;
        self.has_more = false;
        self.pull_in_flight = false;
        self.status = Status::Done;
    }

    /// Terminates the stream with `error`. Rows already buffered stay
    /// readable; the error is raised after them.
    pub(crate) fn fail(&mut self, error: GraphError) {
        if self.is_terminal() {
            return;
        }
        tracing::debug!(seq = self.seq, error = %error, "result failed");
        self.status = Status::Failed;
        self.has_more = false;
        self.pull_in_flight = false;
        self.error = Some(error);
    }

    /// Ends the stream without a footer, after its server cursor was closed.
    pub(crate) fn truncate(&mut self) {
        if !self.is_terminal() {
            self.status = Status::Done;
            self.has_more = false;
            self.pull_in_flight = false;
        }
    }

    /// Takes the terminal error the first time it is asked for.
    pub(crate) fn take_error(&mut self) -> Option<GraphError> {
        if self.error_raised {
            return None;
        }
        self.error_raised = true;
        self.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(fields: &[&str]) -> BoltDict {
        BoltDict::from([(
            "fields".to_string(),
            BoltValue::List(fields.iter().map(|f| BoltValue::from(*f)).collect()),
        )])
    }

    #[test]
    fn lifecycle_through_partial_pulls() {
        let shared = ResultState::new(1, Bindings::new());
        let mut st = shared.lock();
        assert!(!st.satisfies(Goal::Keys));
        st.on_header(header(&["n"]));
        assert!(st.satisfies(Goal::Keys));
        assert!(st.idle_with_more());

        st.pull_in_flight = true;
        st.push_row(Row::Wire(vec![BoltValue::Integer(1)]));
        assert!(!st.on_pull_success(BoltDict::from([(
            "has_more".to_string(),
            BoltValue::Boolean(true)
        )])));
        assert_eq!(st.status, Status::Streaming);
        assert!(st.satisfies(Goal::Rows { want: 1, batch: 1 }));
        assert!(!st.satisfies(Goal::End));

        st.pull_in_flight = true;
        st.on_pull_success(BoltDict::new());
        assert_eq!(st.status, Status::Done);
        assert!(st.satisfies(Goal::End));
    }

    #[test]
    fn discarded_stream_asks_for_discard_after_pull() {
        let shared = ResultState::new(1, Bindings::new());
        let mut st = shared.lock();
        st.on_header(header(&["n"]));
        st.pull_in_flight = true;
        st.discarded = true;
        st.push_row(Row::Wire(vec![BoltValue::Integer(1)]));
        assert!(st.rows.is_empty());
        let more = BoltDict::from([("has_more".to_string(), BoltValue::Boolean(true))]);
        assert!(st.on_pull_success(more));
    }

    #[test]
    fn error_is_raised_once() {
        let shared = ResultState::new(1, Bindings::new());
        let mut st = shared.lock();
        st.fail(GraphError::Protocol("boom".into()));
        assert!(st.take_error().is_some());
        assert!(st.take_error().is_none());
        assert!(st.is_terminal());
    }
}
