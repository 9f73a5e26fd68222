//! Error types for definition rendering.

use thiserror::Error;

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors raised while constructing or rendering a definition.
///
/// None of these ever reach the network: they surface before a command
/// document exists and are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// The resolved field serializer lacks a capability the operator needs.
    #[error("serialization mismatch on field '{field}': {message}")]
    SerializationMismatch {
        /// Wire name of the offending field.
        field: String,
        /// What was expected of the serializer.
        message: String,
    },

    /// A client-side projection was attached to a server-only stage.
    #[error("client-side projection is not supported by the {operator} stage")]
    ClientSideEvaluationNotSupported {
        /// Operator name of the rejecting stage.
        operator: String,
    },

    /// Declared generic field types cannot be connected.
    #[error("incompatible types: {0}")]
    IncompatibleTypes(String),

    /// A definition argument is out of range or mutually exclusive with another.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The expression translator failed.
    #[error("expression translation failed: {0}")]
    ExpressionTranslation(String),

    /// A native expression was rendered without a translator in the context.
    #[error("no expression translator is configured to render {0}")]
    UnsupportedExpression(String),

    /// A value could not be converted to BSON.
    #[error("bson error: {0}")]
    Bson(String),
}

impl RenderError {
    /// Create a serialization mismatch error.
    pub fn serialization_mismatch(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SerializationMismatch {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an array-capability mismatch for the given field.
    pub fn not_an_array(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("the serializer for field '{}' must expose item serialization", field);
        Self::SerializationMismatch { field, message }
    }

    /// Create a client-side evaluation error.
    pub fn client_side_projection(operator: impl Into<String>) -> Self {
        Self::ClientSideEvaluationNotSupported {
            operator: operator.into(),
        }
    }

    /// Create an incompatible types error.
    pub fn incompatible_types(message: impl Into<String>) -> Self {
        Self::IncompatibleTypes(message.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create an expression translation error.
    pub fn translation(message: impl Into<String>) -> Self {
        Self::ExpressionTranslation(message.into())
    }

    /// Check if this is a serialization mismatch.
    pub fn is_serialization_mismatch(&self) -> bool {
        matches!(self, Self::SerializationMismatch { .. })
    }

    /// Check if this is a client-side evaluation error.
    pub fn is_client_side_evaluation(&self) -> bool {
        matches!(self, Self::ClientSideEvaluationNotSupported { .. })
    }

    /// Check if this is an invalid argument error.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Check if this is an incompatible types error.
    pub fn is_incompatible_types(&self) -> bool {
        matches!(self, Self::IncompatibleTypes(_))
    }
}

impl From<bson::ser::Error> for RenderError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Bson(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RenderError::not_an_array("tags");
        assert!(err.is_serialization_mismatch());

        let err = RenderError::client_side_projection("$group");
        assert!(err.is_client_side_evaluation());

        let err = RenderError::invalid_argument("limit must be greater than zero");
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_error_display() {
        let err = RenderError::client_side_projection("$match");
        assert_eq!(
            err.to_string(),
            "client-side projection is not supported by the $match stage"
        );

        let err = RenderError::serialization_mismatch("age", "expected an array");
        assert_eq!(
            err.to_string(),
            "serialization mismatch on field 'age': expected an array"
        );
    }
}
