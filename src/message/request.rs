//! Requests the client sends.

use crate::types::{BoltDict, BoltValue};

/// Sentinel query id meaning "the most recent RUN" in PULL/DISCARD extras.
pub const LAST_QUERY: i64 = -1;

/// One Bolt request. All but GOODBYE are answered by one summary, with
/// RECORDs before it for PULL.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// First message after the handshake; carries the user agent.
    Hello { extra: BoltDict },

    /// Credentials, sent after HELLO from Bolt 5.1 on.
    Logon { auth: BoltDict },

    /// Announces a clean close. Never answered.
    Goodbye,

    /// Clears a failure and drops any open transaction on the server.
    Reset,

    /// Submits a statement. Its stream is then read with PULL or DISCARD.
    Run {
        query: String,
        parameters: BoltDict,
        extra: BoltDict,
    },

    /// Pull up to `n` records from a result (`n = -1` pulls everything).
    Pull { extra: BoltDict },

    /// Discard up to `n` remaining records of a result.
    Discard { extra: BoltDict },

    Begin { extra: BoltDict },

    Commit,

    Rollback,
}

impl ClientMessage {
    /// PULL of everything left in the most recent stream.
    pub fn pull_all() -> Self {
        Self::pull(-1, LAST_QUERY)
    }

    /// Creates a PULL message requesting `n` records of the result `qid`.
    pub fn pull(n: i64, qid: i64) -> Self {
        Self::Pull {
            extra: stream_extra(n, qid),
        }
    }

    /// Creates a DISCARD message dropping the remaining records of the result `qid`.
    pub fn discard(qid: i64) -> Self {
        Self::Discard {
            extra: stream_extra(-1, qid),
        }
    }

    /// Short name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::Logon { .. } => "LOGON",
            Self::Goodbye => "GOODBYE",
            Self::Reset => "RESET",
            Self::Run { .. } => "RUN",
            Self::Pull { .. } => "PULL",
            Self::Discard { .. } => "DISCARD",
            Self::Begin { .. } => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
        }
    }
}

fn stream_extra(n: i64, qid: i64) -> BoltDict {
    let mut extra = BoltDict::from([("n".to_string(), BoltValue::Integer(n))]);
    // The server defaults to the last query, so the key is only sent when needed.
    if qid != LAST_QUERY {
        extra.insert("qid".to_string(), BoltValue::Integer(qid));
    }
    extra
}
