//! Error types for the OPC-UA plugin server

use thiserror::Error;

use crate::status::StatusCode;
use crate::types::NodeId;

/// Main error type for graph mutation, rollback and plugin operations
#[derive(Error, Debug)]
pub enum Error {
    /// The graph store refused a mutation; the status is passed through verbatim
    #[error("Graph store rejected mutation: {0}")]
    Rejected(#[from] StatusCode),

    #[error("Rollback ledger append failed: {0}")]
    LedgerAppend(String),

    #[error("Rollback failed deleting {node}: {status} ({remaining} node(s) left in the graph)")]
    Rollback {
        node: NodeId,
        status: StatusCode,
        remaining: usize,
    },

    #[error("Rollback refused: the engine is already serving requests")]
    RollbackWhileServing,

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Severity classes used by the lifecycle controller to decide containment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A requested mutation was refused; recoverable through rollback
    GraphRejection,
    /// Ledger bookkeeping failed; a created node may be unrecorded
    Bookkeeping,
    /// The graph store refused to delete a node it created
    RollbackFailure,
    /// Device API unreachable or malformed response
    DataSource,
    Other,
}

impl Error {
    /// Create a ledger append error
    pub fn ledger_append(msg: impl Into<String>) -> Self {
        Error::LedgerAppend(msg.into())
    }

    /// Create a data source error
    pub fn data_source(msg: impl Into<String>) -> Self {
        Error::DataSource(msg.into())
    }

    /// Create a plugin error
    pub fn plugin(msg: impl Into<String>) -> Self {
        Error::Plugin(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Rejected(_) => ErrorClass::GraphRejection,
            Error::LedgerAppend(_) => ErrorClass::Bookkeeping,
            Error::Rollback { .. } => ErrorClass::RollbackFailure,
            Error::DataSource(_) => ErrorClass::DataSource,
            _ => ErrorClass::Other,
        }
    }

    /// Only an executor delete failure leaves the graph in a state this layer cannot repair
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::RollbackFailure
    }

    /// The OPC-UA status carried by this error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Rejected(status) => Some(*status),
            Error::Rollback { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_keeps_status() {
        let err: Error = StatusCode::BadNodeIdExists.into();
        assert_eq!(err.status(), Some(StatusCode::BadNodeIdExists));
        assert_eq!(err.class(), ErrorClass::GraphRejection);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rollback_failure_is_fatal() {
        let err = Error::Rollback {
            node: NodeId::numeric(2, 7),
            status: StatusCode::BadNodeIdUnknown,
            remaining: 3,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("ns=2;i=7"));
        assert!(err.to_string().contains("BadNodeIdUnknown"));
    }

    #[test]
    fn test_ledger_append_is_distinct() {
        let err = Error::ledger_append("out of memory");
        assert_eq!(err.class(), ErrorClass::Bookkeeping);
        assert!(!err.is_fatal());
    }
}
