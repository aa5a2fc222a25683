//! Validation related error types

use thiserror::Error;

/// Validation and configuration errors
///
/// Stage configuration errors always name the offending stage and field.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Stage identifier not in the catalog
    #[error("Unknown stage '{stage}'")]
    UnknownStage { stage: String },

    /// Option key not declared by the stage schema
    #[error("Stage '{stage}' has no option '{field}'")]
    UnknownOption { stage: String, field: String },

    /// Option value has the wrong type
    #[error("Stage '{stage}' option '{field}' expects {expected}, got {actual}")]
    WrongType {
        stage: String,
        field: String,
        expected: String,
        actual: String,
    },

    /// Numeric option outside its declared bounds
    #[error("Stage '{stage}' option '{field}' is out of range: {reason}")]
    OutOfRange {
        stage: String,
        field: String,
        reason: String,
    },

    /// Choice option with a value outside its allowed set
    #[error("Stage '{stage}' option '{field}' must be one of [{allowed}], got '{value}'")]
    InvalidChoice {
        stage: String,
        field: String,
        value: String,
        allowed: String,
    },

    /// Options that are individually valid but conflict
    #[error("Stage '{stage}' options conflict: {reason}")]
    Conflict { stage: String, reason: String },

    /// Dataset cannot accept a job in its current state
    #[error("Dataset '{dataset_id}' is not ready (status: {status})")]
    DatasetNotReady { dataset_id: String, status: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Invalid input parameter
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },
}

impl ValidationError {
    /// Create an unknown stage error
    pub fn unknown_stage(stage: &str) -> Self {
        Self::UnknownStage {
            stage: stage.to_string(),
        }
    }

    /// Create an unknown option error
    pub fn unknown_option(stage: &str, field: &str) -> Self {
        Self::UnknownOption {
            stage: stage.to_string(),
            field: field.to_string(),
        }
    }

    /// Create a wrong type error
    pub fn wrong_type(stage: &str, field: &str, expected: &str, actual: &str) -> Self {
        Self::WrongType {
            stage: stage.to_string(),
            field: field.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an out of range error
    pub fn out_of_range(stage: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            stage: stage.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid choice error
    pub fn invalid_choice(stage: &str, field: &str, value: &str, allowed: &[&str]) -> Self {
        Self::InvalidChoice {
            stage: stage.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            allowed: allowed.join(", "),
        }
    }

    /// Create a conflicting options error
    pub fn conflict(stage: &str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a dataset not ready error
    pub fn dataset_not_ready(dataset_id: impl ToString, status: impl ToString) -> Self {
        Self::DatasetNotReady {
            dataset_id: dataset_id.to_string(),
            status: status.to_string(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(message: &str) -> Self {
        Self::InvalidConfiguration {
            message: message.to_string(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: &str, reason: &str) -> Self {
        Self::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Stage named by this error, when it concerns one
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::UnknownStage { stage }
            | Self::UnknownOption { stage, .. }
            | Self::WrongType { stage, .. }
            | Self::OutOfRange { stage, .. }
            | Self::InvalidChoice { stage, .. }
            | Self::Conflict { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Field named by this error, when it concerns one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::UnknownOption { field, .. }
            | Self::WrongType { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::InvalidChoice { field, .. } => Some(field),
            Self::InvalidParameter { parameter, .. } => Some(parameter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_error() {
        let error = ValidationError::invalid_configuration("Bad config");
        assert!(error.to_string().contains("Invalid configuration"));
        assert!(error.to_string().contains("Bad config"));
    }

    #[test]
    fn test_wrong_type_names_field() {
        let error = ValidationError::wrong_type("deduplication", "threshold", "number", "string");
        assert_eq!(error.stage(), Some("deduplication"));
        assert_eq!(error.field(), Some("threshold"));
        assert!(error.to_string().contains("expects number"));
    }

    #[test]
    fn test_invalid_choice_lists_allowed() {
        let error =
            ValidationError::invalid_choice("pii_scrubbing", "action", "shred", &["redact", "flag"]);
        assert!(error.to_string().contains("[redact, flag]"));
        assert!(error.to_string().contains("shred"));
    }

    #[test]
    fn test_unknown_stage_has_no_field() {
        let error = ValidationError::unknown_stage("nonexistent_stage");
        assert_eq!(error.stage(), Some("nonexistent_stage"));
        assert_eq!(error.field(), None);
    }
}
