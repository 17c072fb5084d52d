//! Responses the server sends.

use crate::types::{BoltDict, BoltValue};

/// One Bolt response: a RECORD, or the summary that closes a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Success { metadata: BoltDict },

    /// One row of the stream being pulled.
    Record { data: Vec<BoltValue> },

    /// Carries `code` and `message`. The server ignores everything after it
    /// until a RESET.
    Failure { metadata: BoltDict },

    /// Sent for requests that arrive while the connection is failed.
    Ignored,
}

impl ServerMessage {
    /// Builds a SUCCESS carrying a single metadata entry.
    pub fn success_with(key: &str, value: impl Into<BoltValue>) -> Self {
        Self::Success {
            metadata: BoltDict::from([(key.to_string(), value.into())]),
        }
    }

    /// Builds a FAILURE with the given status code and message.
    pub fn failure(code: &str, message: &str) -> Self {
        Self::Failure {
            metadata: [("code", code), ("message", message)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), BoltValue::from(v)))
                .collect(),
        }
    }

    /// Returns `true` for SUCCESS, FAILURE and IGNORED, the messages that
    /// close a request/response exchange.
    pub fn is_summary(&self) -> bool {
        !matches!(self, Self::Record { .. })
    }
}
