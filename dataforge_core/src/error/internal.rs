//! Internal library error types

use thiserror::Error;

/// Internal library errors
#[derive(Error, Debug)]
pub enum InternalError {
    /// Artifact storage operation failed
    #[error("Storage {operation} failed: {message}")]
    Storage {
        operation: String,
        message: String,
        transient: bool,
    },

    /// Underlying I/O failure
    #[error("I/O error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },

    /// Serialization of an artifact or record failed
    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    /// Job queue or worker pool cannot accept work
    #[error("Worker pool unavailable: {message}")]
    WorkerUnavailable { message: String },

    /// Lookup for a dataset, job or artifact failed
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    /// Internal assertion failure
    #[error("Internal assertion failed: {message}")]
    Assertion { message: String },
}

impl InternalError {
    /// Create a storage error
    pub fn storage(operation: &str, message: impl Into<String>, transient: bool) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            message: message.into(),
            transient,
        }
    }

    /// Wrap a std I/O error
    pub fn io(source: std::io::Error) -> Self {
        Self::Io { source }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a worker unavailable error
    pub fn worker_unavailable(message: impl Into<String>) -> Self {
        Self::WorkerUnavailable {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Create an internal assertion failure error
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage { transient, .. } => *transient,
            Self::Io { source } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            Self::WorkerUnavailable { .. } => true,
            _ => false,
        }
    }
}
