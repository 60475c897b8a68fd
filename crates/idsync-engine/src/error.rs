//! Sync error types.

use std::time::Duration;

use idsync_connector::ConnectorError;
use thiserror::Error;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store reported that its connection is gone. Ends the pass.
    #[error("Connection lost to {store}: {source}")]
    ConnectionLost {
        store: String,
        #[source]
        source: ConnectorError,
    },

    /// A store operation failed for a single unit.
    #[error("Adapter error from {store}: {source}")]
    Adapter {
        store: String,
        #[source]
        source: ConnectorError,
    },

    /// An expression could not be compiled or evaluated.
    #[error("Evaluation error in '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    /// Configuration error. The pass never begins.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The pass ran out of time.
    #[error("Pass exceeded its time limit of {}s", .limit.as_secs())]
    Timeout { limit: Duration },

    /// The source store listed no pivots.
    #[error("Source store {store} returned no pivots")]
    EmptySource { store: String },

    /// No destination identifier could be resolved for a create.
    #[error("Cannot resolve destination identifier: {message}")]
    MissingIdentifier { message: String },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Classify a store error raised by `store`.
    ///
    /// `lost` is the store's own connection-lost verdict.
    pub fn from_adapter(store: impl Into<String>, source: ConnectorError, lost: bool) -> Self {
        if lost {
            Self::ConnectionLost {
                store: store.into(),
                source,
            }
        } else {
            Self::Adapter {
                store: store.into(),
                source,
            }
        }
    }

    /// Create an evaluation error.
    pub fn evaluation(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a missing identifier error.
    pub fn missing_identifier(message: impl Into<String>) -> Self {
        Self::MissingIdentifier {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error means a store connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SyncError::ConnectionLost { .. })
    }

    /// Errors that end the whole pass rather than a single unit.
    pub fn is_fatal_to_pass(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionLost { .. }
                | SyncError::Configuration { .. }
                | SyncError::EmptySource { .. }
        )
    }

    /// Error code of the underlying store error, if a store raised it.
    pub fn adapter_code(&self) -> Option<&'static str> {
        match self {
            SyncError::ConnectionLost { source, .. } | SyncError::Adapter { source, .. } => {
                Some(source.error_code())
            }
            _ => None,
        }
    }

    /// Short machine-readable kind, used in audit records and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::ConnectionLost { .. } => "connection_lost",
            SyncError::Adapter { .. } => "adapter",
            SyncError::Evaluation { .. } => "evaluation",
            SyncError::Configuration { .. } => "configuration",
            SyncError::Timeout { .. } => "timeout",
            SyncError::EmptySource { .. } => "empty_source",
            SyncError::MissingIdentifier { .. } => "missing_identifier",
            SyncError::Internal { .. } => "internal",
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
