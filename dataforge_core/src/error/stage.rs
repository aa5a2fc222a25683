//! Stage execution error types

use thiserror::Error;

/// Errors raised by a stage's transformation logic
#[derive(Error, Debug)]
pub enum StageError {
    /// Transformation failed on the data
    #[error("Stage '{stage}' failed: {message}")]
    Failed { stage: String, message: String },

    /// A configured column does not exist in the table
    #[error("Stage '{stage}' references missing column '{column}'")]
    ColumnNotFound { stage: String, column: String },

    /// A scoring or similarity model the stage depends on is unavailable
    #[error("Stage '{stage}' requires model '{model}', which is unavailable")]
    ModelUnavailable { stage: String, model: String },

    /// Stage exceeded its execution budget
    #[error("Stage '{stage}' timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },
}

impl StageError {
    /// Create a stage failure error
    pub fn failed(stage: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Create a missing column error
    pub fn column_not_found(stage: &str, column: &str) -> Self {
        Self::ColumnNotFound {
            stage: stage.to_string(),
            column: column.to_string(),
        }
    }

    /// Create a model unavailable error
    pub fn model_unavailable(stage: &str, model: &str) -> Self {
        Self::ModelUnavailable {
            stage: stage.to_string(),
            model: model.to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout(stage: &str, seconds: u64) -> Self {
        Self::Timeout {
            stage: stage.to_string(),
            seconds,
        }
    }

    /// Stage that raised the error
    pub fn stage(&self) -> &str {
        match self {
            Self::Failed { stage, .. }
            | Self::ColumnNotFound { stage, .. }
            | Self::ModelUnavailable { stage, .. }
            | Self::Timeout { stage, .. } => stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_error() {
        let error = StageError::failed("noise_removal", "bad regex");
        assert_eq!(error.stage(), "noise_removal");
        assert!(error.to_string().contains("bad regex"));
    }

    #[test]
    fn test_timeout_error() {
        let error = StageError::timeout("quality_scorer", 30);
        assert!(error.to_string().contains("timed out after 30s"));
    }
}
