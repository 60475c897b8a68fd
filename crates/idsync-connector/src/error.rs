//! Store adapter error types
//!
//! A connection-lost error ends the whole pass; every other variant stays
//! within the reconciliation unit that raised it.

use thiserror::Error;

/// Error that can occur during store adapter operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The connection to the store is gone.
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The adapter does not implement the requested operation.
    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },

    // Schema errors
    /// A record carried a field the entity schema does not declare.
    #[error("attribute '{attribute}' not declared for entity '{entity}'")]
    AttributeNotDeclared { attribute: String, entity: String },

    /// A record field could not be coerced to its declared type.
    #[error("attribute '{attribute}' expects {expected}: {message}")]
    AttributeType {
        attribute: String,
        expected: String,
        message: String,
    },

    // Operation errors
    /// The store refused a change.
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    /// Entry already exists in the store (create conflict).
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// Entry not found in the store (update/delete target missing).
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// Invalid data format.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// File-backed store I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl ConnectorError {
    /// Check if this error means the connection to the store is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ConnectorError::ConnectionFailed { .. })
    }

    /// Get an error code for classification in logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::Unsupported { .. } => "UNSUPPORTED",
            ConnectorError::AttributeNotDeclared { .. } => "ATTRIBUTE_NOT_DECLARED",
            ConnectorError::AttributeType { .. } => "ATTRIBUTE_TYPE",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::Io(_) => "IO_ERROR",
            ConnectorError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        ConnectorError::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        ConnectorError::InvalidData {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type for store adapter operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
