use colored::*;
use dataforge_core::error::{IngestionError, ValidationError};
use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Commands the binary understands, used for typo suggestions
const COMMANDS: &[&str] = &["ingest", "run", "stages", "preview", "config", "completions"];

/// CLI-specific error type with semantic exit codes
#[derive(Debug)]
pub struct CliError {
    message: String,

    category: ErrorCategory,

    context: Vec<(String, String)>,

    pub suggestions: Vec<String>,

    source: Option<Box<dyn StdError + Send + Sync>>,
}

/// Error categories that map to exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCategory {
    General,
    Misuse,
    InvalidData,
    Filesystem,
    JobFailed,
}

/// Semantic exit codes for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    Misuse = 2,
    InvalidData = 3,
    FilesystemError = 4,
    JobFailed = 5,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl CliError {
    fn new(message: &str, category: ErrorCategory) -> Self {
        Self {
            message: message.to_string(),
            category,
            context: Vec::new(),
            suggestions: Vec::new(),
            source: None,
        }
    }

    /// Create a general error
    pub fn general(message: &str) -> Self {
        Self::new(message, ErrorCategory::General)
    }

    /// Create a command misuse error
    pub fn misuse(message: &str) -> Self {
        let mut error = Self::new(message, ErrorCategory::Misuse);
        error
            .suggestions
            .push("Run 'dataforge --help' for usage information".to_string());

        if message.contains("Unknown command")
            && let Some(cmd) = message.split(':').nth(1).map(|s| s.trim())
            && let Some(known) = closest(cmd, COMMANDS)
        {
            error.suggestions.insert(0, format!("Did you mean '{known}'?"));
        }

        error
    }

    /// Create an error for data the engine refused
    pub fn invalid_data(message: &str) -> Self {
        Self::new(message, ErrorCategory::InvalidData)
    }

    /// Create an error for a job that ended failed or cancelled
    pub fn job_failed(message: &str) -> Self {
        Self::new(message, ErrorCategory::JobFailed)
    }

    /// Create a filesystem error
    pub fn filesystem(message: &str) -> Self {
        let mut error = Self::new(message, ErrorCategory::Filesystem);

        if message.contains("not found") {
            error
                .suggestions
                .push("Check if the file exists".to_string());
            error
                .suggestions
                .push("Verify you have the correct path".to_string());
        } else if message.contains("permission") || message.contains("denied") {
            error.suggestions.push("Check file permissions".to_string());
        }

        error
    }

    /// Create an error from an IO error
    pub fn from_io_error(error: io::Error, path: &str) -> Self {
        let message = format!("IO error on '{path}': {error}");
        let mut cli_error = match error.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                Self::filesystem(&message)
            }
            _ => Self::general(&message),
        };

        cli_error.source = Some(Box::new(error));
        cli_error
            .context
            .push(("path".to_string(), path.to_string()));
        cli_error
    }

    /// Map an engine error, adding suggestions for the common mistakes
    pub fn from_core_error(error: dataforge_core::Error) -> Self {
        let message = error.describe();
        let mut cli_error = if error.is_user_error() {
            Self::invalid_data(&message)
        } else {
            Self::general(&message)
        };

        match &error {
            dataforge_core::Error::Validation(ValidationError::UnknownStage { stage }) => {
                let ids: Vec<&str> = dataforge_core::StageKind::ALL
                    .iter()
                    .map(|k| k.id())
                    .collect();
                if let Some(known) = closest(stage, &ids) {
                    cli_error
                        .suggestions
                        .push(format!("Did you mean '{known}'?"));
                }
                cli_error
                    .suggestions
                    .push("Run 'dataforge stages' to list available stages".to_string());
            }
            dataforge_core::Error::Validation(v) => {
                if let Some(stage) = v.stage() {
                    cli_error.context.push(("stage".to_string(), stage.to_string()));
                }
                if let Some(field) = v.field() {
                    cli_error.context.push(("option".to_string(), field.to_string()));
                }
            }
            dataforge_core::Error::Ingestion(IngestionError::Undetected { .. }) => {
                cli_error
                    .suggestions
                    .push("Pass --format to name the file format explicitly".to_string());
            }
            _ => {}
        }

        cli_error.source = Some(Box::new(error));
        cli_error
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self.category {
            ErrorCategory::General => ExitCode::GeneralError,
            ErrorCategory::Misuse => ExitCode::Misuse,
            ErrorCategory::InvalidData => ExitCode::InvalidData,
            ErrorCategory::Filesystem => ExitCode::FilesystemError,
            ErrorCategory::JobFailed => ExitCode::JobFailed,
        }
    }

    fn label(&self) -> &'static str {
        match self.category {
            ErrorCategory::General => "Error",
            ErrorCategory::Misuse => "Usage Error",
            ErrorCategory::InvalidData => "Invalid Input",
            ErrorCategory::Filesystem => "File Error",
            ErrorCategory::JobFailed => "Job Failed",
        }
    }

    /// Format the error for user display
    pub fn format_for_user(&self, debug: bool) -> String {
        let mut output = String::new();

        let prefix = match self.category {
            ErrorCategory::Misuse | ErrorCategory::InvalidData => self.label().yellow(),
            _ => self.label().red(),
        };
        output.push_str(&format!("{}: {}\n", prefix, self.message));

        if !self.context.is_empty() {
            output.push_str("\nContext:\n");
            for (key, value) in &self.context {
                output.push_str(&format!("  {}: {}\n", key.bold(), value));
            }
        }

        if debug && let Some(source) = &self.source {
            output.push_str("\nCaused by:\n");
            let mut current: Option<&dyn StdError> = Some(source.as_ref());
            let mut level = 1;

            while let Some(err) = current {
                output.push_str(&format!("  {level}: {err}\n"));
                current = err.source();
                level += 1;
            }
        }

        if !self.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in &self.suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        output
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.message)?;

        for (key, value) in &self.context {
            write!(f, " ({key}: {value})")?;
        }

        Ok(())
    }
}

impl StdError for CliError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<dataforge_core::Error> for CliError {
    fn from(error: dataforge_core::Error) -> Self {
        Self::from_core_error(error)
    }
}

/// Convert anyhow errors to CLI errors, keeping engine errors' categories
impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<CliError>() {
            Ok(cli_error) => cli_error,
            Err(error) => match error.downcast::<dataforge_core::Error>() {
                Ok(core_error) => Self::from_core_error(core_error),
                Err(error) => Self::general(&format!("{error:#}")),
            },
        }
    }
}

/// Closest candidate within an edit distance of 2
fn closest<'a>(word: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (levenshtein_distance(word, c), *c))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

/// Simple Levenshtein distance for command suggestions
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let len1 = s1_chars.len();
    let len2 = s2_chars.len();
    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for (j, cell) in matrix[0].iter_mut().enumerate().take(len2 + 1) {
        *cell = j;
    }

    for (i, c1) in s1_chars.iter().enumerate() {
        let i1 = i + 1;
        for (j, c2) in s2_chars.iter().enumerate() {
            let j1 = j + 1;
            let cost = if c1 == c2 { 0 } else { 1 };
            matrix[i1][j1] = std::cmp::min(
                std::cmp::min(matrix[i][j1] + 1, matrix[i1][j] + 1),
                matrix[i][j] + cost,
            );
        }
    }

    matrix[len1][len2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("ingest", "ingest"), 0);
        assert_eq!(levenshtein_distance("ingset", "ingest"), 2);
        assert_eq!(levenshtein_distance("", "run"), 3);
    }

    #[test]
    fn test_misuse_suggests_known_command() {
        let error = CliError::misuse("Unknown command: ingets");
        assert_eq!(error.exit_code(), ExitCode::Misuse);
        assert_eq!(error.suggestions[0], "Did you mean 'ingest'?");
    }

    #[test]
    fn test_unknown_stage_suggests_closest_id() {
        let error = CliError::from_core_error(ValidationError::unknown_stage("deduplicaton").into());
        assert_eq!(error.exit_code(), ExitCode::InvalidData);
        assert!(
            error
                .suggestions
                .iter()
                .any(|s| s == "Did you mean 'deduplication'?")
        );
    }

    #[test]
    fn test_anyhow_keeps_engine_error_category() {
        let error: anyhow::Error =
            dataforge_core::Error::from(ValidationError::unknown_stage("nope")).into();
        let cli_error = CliError::from(error);
        assert_eq!(cli_error.exit_code(), ExitCode::InvalidData);
        assert!(cli_error.to_string().starts_with("Invalid Input: invalid input"));
    }

    #[test]
    fn test_io_not_found_is_filesystem_error() {
        let error = CliError::from_io_error(
            io::Error::new(io::ErrorKind::NotFound, "missing"),
            "data.csv",
        );
        assert_eq!(error.exit_code(), ExitCode::FilesystemError);
        assert!(error.format_for_user(false).contains("data.csv"));
    }
}
