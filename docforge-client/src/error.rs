//! Error types for collection operations.

use docforge_render::RenderError;
use thiserror::Error;

use crate::bulk::{BulkWriteException, BulkWriteOperationError, WriteConcernError, WriteError};

/// Result type for collection operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by the collection facade and its collaborators.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A required argument is missing, empty or conflicts with another.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A definition failed to render.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Settings could not be built or converted.
    #[error("configuration error: {0}")]
    Config(String),

    /// The call violates the constraints of the session's transaction.
    #[error("transaction policy violation: {0}")]
    TransactionPolicy(String),

    /// The cancellation token fired before I/O started.
    #[error("operation was cancelled")]
    Cancelled,

    /// A single-document write failed.
    #[error("write failed: {0}")]
    Write(Box<WriteException>),

    /// A bulk write partially failed; errors are keyed by request position.
    #[error("bulk write failed: {0}")]
    BulkWrite(Box<BulkWriteException>),

    /// The runtime reported a partial bulk failure in its own request order.
    #[error("bulk write operation failed: {0}")]
    BulkWriteOperation(Box<BulkWriteOperationError>),

    /// The runtime failed to execute an operation.
    #[error("execution error: {message}")]
    Execution {
        /// Server or runtime message.
        message: String,
        /// Server error code, when known.
        code: Option<i32>,
        /// Error labels attached by the server.
        labels: Vec<String>,
    },

    /// A result document could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),

    /// A value could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    /// A disposed session was used.
    #[error("session has been disposed")]
    SessionDisposed,

    /// The underlying driver failed.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),
}

/// A single-document write failure, derived from a one-request bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteException {
    /// The write error, if the write itself failed.
    pub write_error: Option<WriteError>,
    /// The write concern error, if the write was not sufficiently replicated.
    pub write_concern_error: Option<WriteConcernError>,
}

impl std::fmt::Display for WriteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.write_error, &self.write_concern_error) {
            (Some(error), _) => write!(f, "{} (code {})", error.message, error.code),
            (None, Some(error)) => write!(f, "write concern: {} (code {})", error.message, error.code),
            (None, None) => write!(f, "unknown write failure"),
        }
    }
}

impl WriteException {
    /// Translate a correlated bulk failure of a single request.
    pub fn from_bulk(exception: &BulkWriteException) -> Self {
        Self {
            write_error: exception.write_errors.first().cloned(),
            write_concern_error: exception.write_concern_error.clone(),
        }
    }
}

impl ClientError {
    /// Create an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a transaction policy error.
    pub fn transaction_policy(message: impl Into<String>) -> Self {
        Self::TransactionPolicy(message.into())
    }

    /// Create an execution error without a server code.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            code: None,
            labels: Vec::new(),
        }
    }

    /// Create an execution error with a server code and labels.
    pub fn server(message: impl Into<String>, code: i32, labels: Vec<String>) -> Self {
        Self::Execution {
            message: message.into(),
            code: Some(code),
            labels,
        }
    }

    /// Check if this is an argument error.
    pub fn is_argument_error(&self) -> bool {
        matches!(self, Self::Argument(_))
    }

    /// Check if this is a render error.
    pub fn is_render_error(&self) -> bool {
        matches!(self, Self::Render(_))
    }

    /// Check if this is a transaction policy error.
    pub fn is_transaction_policy(&self) -> bool {
        matches!(self, Self::TransactionPolicy(_))
    }

    /// Check if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error was raised before any I/O.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::Argument(_) | Self::Render(_) | Self::TransactionPolicy(_) | Self::Cancelled
        )
    }

    /// Whether the server labelled this error as retryable.
    ///
    /// Argument, render and policy errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Execution { labels, .. } => labels
                .iter()
                .any(|l| l == "RetryableWriteError" || l == "TransientTransactionError"),
            Self::Driver(e) => {
                e.contains_label("RetryableWriteError") || e.contains_label("TransientTransactionError")
            }
            _ => false,
        }
    }

    /// Server error code, when known.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Execution { code, .. } => *code,
            Self::Write(e) => e
                .write_error
                .as_ref()
                .map(|w| w.code)
                .or_else(|| e.write_concern_error.as_ref().map(|w| w.code)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ClientError::argument("requests must not be empty");
        assert!(err.is_argument_error());
        assert!(err.is_pre_execution());
        assert!(!err.is_retryable());

        let err: ClientError = RenderError::invalid_argument("limit").into();
        assert!(err.is_render_error());

        let err = ClientError::transaction_policy("read preference must be primary");
        assert!(err.is_transaction_policy());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_labels() {
        let err = ClientError::server("not primary", 10107, vec!["RetryableWriteError".into()]);
        assert!(err.is_retryable());
        assert_eq!(err.code(), Some(10107));

        let err = ClientError::execution("socket closed");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::argument("filter");
        assert_eq!(err.to_string(), "invalid argument: filter");

        let err = ClientError::Write(Box::new(WriteException {
            write_error: Some(WriteError {
                index: 0,
                code: 11000,
                message: "duplicate key".into(),
                details: None,
            }),
            write_concern_error: None,
        }));
        assert_eq!(err.to_string(), "write failed: duplicate key (code 11000)");
        assert_eq!(err.code(), Some(11000));
    }
}
