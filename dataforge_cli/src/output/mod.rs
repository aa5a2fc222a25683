mod formatters;

pub use formatters::{JsonFormatter, TextFormatter};

use anyhow::Result;
use dataforge_core::stages::StageSchema;
use dataforge_core::{Dataset, DatasetPreview, DatasetStats, Job};

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// Parse output format from string
    pub fn from_string(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Unknown output format: {}", s),
        }
    }
}

/// Renders engine records for the terminal or for other programs
pub trait OutputFormatter: Send + Sync {
    /// Dataset metadata, with column statistics once it is ready
    fn format_dataset(&self, dataset: &Dataset, stats: Option<&DatasetStats>) -> Result<String>;

    /// A job and its result
    fn format_job(&self, job: &Job) -> Result<String>;

    /// The stage catalog
    fn format_stages(&self, stages: &[StageSchema]) -> Result<String>;

    /// First rows of a dataset
    fn format_preview(&self, preview: &DatasetPreview) -> Result<String>;
}

/// Create a formatter based on output format
pub fn create_formatter(format: OutputFormat, use_color: bool) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter::new(use_color)),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_format() {
        assert_eq!(OutputFormat::from_string("TEXT").unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::from_string("json").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::from_string("yaml").is_err());
    }
}
