//! Error types for the graph client.

use std::time::Duration;

use crate::tx::TxState;
use crate::types::BoltDict;

/// Retry classification of an error, following the server's status code
/// families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The request was invalid; changing it may succeed.
    Client,
    /// The server failed for reasons unrelated to the request.
    Database,
    /// The server (or the network) cannot serve the request right now.
    /// Retrying the whole transaction may succeed.
    Transient,
    /// Misuse of the client API or a local decoding fault.
    Driver,
}

/// Finer-grained kinds of client errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    Constraint,
    Syntax,
    Type,
    Forbidden,
    Unauthorized,
    Other,
}

impl ClientErrorKind {
    /// Maps a full `Neo.ClientError.*` status code to its kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "Neo.ClientError.Schema.ConstraintValidationFailed"
            | "Neo.ClientError.Schema.ConstraintViolation"
            | "Neo.ClientError.Statement.ConstraintVerificationFailed"
            | "Neo.ClientError.Statement.ConstraintViolation" => Self::Constraint,

            "Neo.ClientError.Statement.InvalidSyntax" | "Neo.ClientError.Statement.SyntaxError" => {
                Self::Syntax
            }

            "Neo.ClientError.Procedure.TypeError"
            | "Neo.ClientError.Statement.InvalidType"
            | "Neo.ClientError.Statement.TypeError" => Self::Type,

            "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
            | "Neo.ClientError.General.ReadOnly"
            | "Neo.ClientError.Schema.ForbiddenOnConstraintIndex"
            | "Neo.ClientError.Schema.IndexBelongsToConstraint"
            | "Neo.ClientError.Security.Forbidden"
            | "Neo.ClientError.Transaction.ForbiddenDueToTransactionType" => Self::Forbidden,

            "Neo.ClientError.Security.AuthorizationFailed"
            | "Neo.ClientError.Security.Unauthorized" => Self::Unauthorized,

            _ => Self::Other,
        }
    }
}

/// Errors that can occur while talking to a graph database.
///
/// The type is `Clone` because one server failure is delivered to every
/// result it invalidates.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("{code}: {message}")]
    Client {
        kind: ClientErrorKind,
        code: String,
        message: String,
    },

    #[error("{code}: {message}")]
    Database { code: String, message: String },

    #[error("{code}: {message}")]
    Transient { code: String, message: String },

    #[error("transaction already {0}")]
    TransactionFinished(TxState),

    #[error("malformed path: {0}")]
    MalformedPath(String),

    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl GraphError {
    /// Builds a typed error from a server status code such as
    /// `Neo.ClientError.Statement.SyntaxError`. Code and message are kept
    /// verbatim.
    pub fn from_code(code: &str, message: &str) -> Self {
        let code = code.to_string();
        let message = message.to_string();
        match code.split('.').nth(1) {
            Some("ClientError") => Self::Client {
                kind: ClientErrorKind::from_code(&code),
                code,
                message,
            },
            Some("TransientError") => Self::Transient { code, message },
            _ => Self::Database { code, message },
        }
    }

    /// Builds a typed error from Bolt FAILURE metadata.
    pub fn from_failure(metadata: &BoltDict) -> Self {
        let code = metadata
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("Neo.DatabaseError.General.UnknownError");
        let message = metadata
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        Self::from_code(code, message)
    }

    /// Returns the retry classification of this error.
    pub fn classification(&self) -> Classification {
        match self {
            Self::Client { .. } => Classification::Client,
            Self::Database { .. } => Classification::Database,
            Self::Transient { .. } | Self::ServiceUnavailable(_) | Self::Timeout(_) => {
                Classification::Transient
            }
            _ => Classification::Driver,
        }
    }

    /// Whether retrying the whole transaction from the start may succeed.
    /// The client itself never retries.
    pub fn is_retryable(&self) -> bool {
        self.classification() == Classification::Transient
    }

    /// Whether this error means the underlying connection can no longer be used.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::Timeout(_))
    }

    /// The server status code, for server-reported errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Client { code, .. } | Self::Database { code, .. } | Self::Transient { code, .. } => {
                Some(code)
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for GraphError {
    fn from(e: std::io::Error) -> Self {
        Self::ServiceUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::ServiceUnavailable(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoltValue;

    #[test]
    fn failure_metadata_is_classified() {
        let meta = BoltDict::from([
            (
                "code".to_string(),
                BoltValue::String("Neo.ClientError.Schema.ConstraintValidationFailed".into()),
            ),
            ("message".to_string(), BoltValue::String("already exists".into())),
        ]);
        let err = GraphError::from_failure(&meta);
        match &err {
            GraphError::Client { kind, code, message } => {
                assert_eq!(*kind, ClientErrorKind::Constraint);
                assert_eq!(code, "Neo.ClientError.Schema.ConstraintValidationFailed");
                assert_eq!(message, "already exists");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_and_connection_faults_are_retryable() {
        let deadlock = GraphError::from_code("Neo.TransientError.Transaction.DeadlockDetected", "x");
        assert_eq!(deadlock.classification(), Classification::Transient);
        assert!(deadlock.is_retryable());

        let reset: GraphError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(reset.is_retryable());
        assert!(reset.is_connection_fault());
        assert!(GraphError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn unknown_classifications_are_database_errors() {
        let err = GraphError::from_code("Neo.DatabaseError.General.UnknownError", "boom");
        assert_eq!(err.classification(), Classification::Database);
        assert_eq!(err.code(), Some("Neo.DatabaseError.General.UnknownError"));
        assert_eq!(err.to_string(), "Neo.DatabaseError.General.UnknownError: boom");
    }

    #[test]
    fn local_misuse_is_a_driver_error() {
        let err = GraphError::TransactionFinished(TxState::Committed);
        assert_eq!(err.classification(), Classification::Driver);
        assert_eq!(err.to_string(), "transaction already committed");
    }
}
