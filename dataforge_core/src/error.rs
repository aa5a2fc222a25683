//! Error types for the DataForge core library
//!
//! Errors are organized by where they originate so callers can tell an
//! invalid request apart from a failure inside the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod ingestion;
pub mod internal;
pub mod stage;
pub mod validation;

pub use self::ingestion::IngestionError;
pub use self::internal::InternalError;
pub use self::stage::StageError;
pub use self::validation::ValidationError;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the DataForge core library
///
/// Errors are categorized into four main types:
/// - Ingestion errors: unsupported or corrupt input, size mismatches, upload bookkeeping
/// - Validation errors: malformed stage configuration or requests
/// - Stage errors: a transformation failed on the data it was given
/// - Internal errors: storage, worker and bookkeeping failures inside the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Ingestion related errors
    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    /// Validation related errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Stage execution errors
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Internal library errors
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Who is responsible for a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The input or configuration supplied by the caller was invalid
    InvalidInput,
    /// The engine failed while doing its work
    Internal,
}

impl FailureKind {
    /// Short human-readable label used as a message prefix
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid input",
            Self::Internal => "internal failure",
        }
    }
}

impl Error {
    /// True when the caller's input or configuration caused the error
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Ingestion(_) | Self::Validation(_))
    }

    /// Classify this error for terminal job and dataset messages
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_user_error() {
            FailureKind::InvalidInput
        } else {
            FailureKind::Internal
        }
    }

    /// True for infrastructure failures worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Internal(err) => err.is_recoverable(),
            _ => false,
        }
    }

    /// Message prefixed with its failure classification
    pub fn describe(&self) -> String {
        format!("{}: {}", self.failure_kind().label(), self)
    }
}

// Conversions from external error types

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Internal(InternalError::io(source))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(InternalError::serialization(err.to_string()))
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Self::Ingestion(IngestionError::malformed("csv", &err.to_string()))
    }
}
