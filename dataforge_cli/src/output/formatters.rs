use super::OutputFormatter;
use crate::progress::{format_bytes, format_elapsed, format_row_rate};
use anyhow::Result;
use colored::*;
use dataforge_core::stages::{FieldKind, StageSchema};
use dataforge_core::{Dataset, DatasetPreview, DatasetStats, Job, JobStatus};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;
use std::time::Duration;

const MAX_CELL_WIDTH: usize = 40;

/// Text formatter for human-readable output
pub struct TextFormatter {
    use_color: bool,
}

impl TextFormatter {
    pub fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    fn colorize(&self, text: &str, color: fn(&str) -> ColoredString) -> String {
        if self.use_color {
            color(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn job_status(&self, status: JobStatus) -> String {
        let color: fn(&str) -> ColoredString = match status {
            JobStatus::Completed => |s| s.green(),
            JobStatus::Failed => |s| s.red(),
            JobStatus::Cancelled => |s| s.yellow(),
            JobStatus::Queued | JobStatus::Running => |s| s.cyan(),
        };
        self.colorize(status.as_str(), color)
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn describe_kind(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Boolean => "boolean".to_string(),
        FieldKind::Number { min, max, integer } => {
            let name = if *integer { "integer" } else { "number" };
            match (min, max) {
                (Some(lo), Some(hi)) => format!("{name} {lo}..={hi}"),
                (Some(lo), None) => format!("{name} >= {lo}"),
                (None, Some(hi)) => format!("{name} <= {hi}"),
                (None, None) => name.to_string(),
            }
        }
        FieldKind::Text => "string".to_string(),
        FieldKind::Choice { choices } => format!("one of {}", choices.join("|")),
        FieldKind::List => "list".to_string(),
        FieldKind::ListOrAll { all } => format!("list or \"{all}\""),
    }
}

impl OutputFormatter for TextFormatter {
    fn format_dataset(&self, dataset: &Dataset, stats: Option<&DatasetStats>) -> Result<String> {
        let mut output = String::new();

        writeln!(
            output,
            "Dataset: {} ({})",
            self.colorize(&dataset.name, |s| s.bold()),
            dataset.id
        )?;
        writeln!(output, "Status: {}", dataset.status)?;
        if let Some(format) = dataset.format {
            writeln!(output, "Format: {format}")?;
        }
        writeln!(
            output,
            "Size: {} ({})",
            format_bytes(dataset.size_bytes),
            dataset.size_bytes
        )?;
        if let (Some(rows), Some(columns)) = (dataset.row_count, dataset.column_count) {
            writeln!(output, "Rows: {rows}  Columns: {columns}")?;
        }
        writeln!(output, "Version: {}", dataset.version)?;
        if let Some(error) = &dataset.error_message {
            writeln!(output, "Error: {}", self.colorize(error, |s| s.red()))?;
        }
        for warning in &dataset.warnings {
            writeln!(output, "Warning: {}", self.colorize(warning, |s| s.yellow()))?;
        }

        if let Some(stats) = stats {
            if let Some(language) = &stats.detected_language {
                writeln!(output, "Language: {language}")?;
            }
            writeln!(output, "Estimated tokens: {}", stats.estimated_tokens)?;
            if !stats.columns.is_empty() {
                writeln!(output, "\nColumns:")?;
            }
            for column in &stats.columns {
                write!(
                    output,
                    "  {} [{}] nulls {} ({:.1}%) unique {}",
                    self.colorize(&column.name, |s| s.cyan()),
                    column.dtype,
                    column.null_count,
                    column.null_percentage,
                    column.unique_count
                )?;
                if let (Some(min), Some(max), Some(mean)) = (column.min, column.max, column.mean) {
                    write!(output, " min {min} max {max} mean {mean:.2}")?;
                }
                writeln!(output)?;
            }
        }

        Ok(output)
    }

    fn format_job(&self, job: &Job) -> Result<String> {
        let mut output = String::new();

        writeln!(output, "Job: {} [{}]", job.id, self.job_status(job.status))?;
        writeln!(output, "Dataset: {}", job.dataset_id)?;

        if let Some(error) = &job.error_message {
            let kind = job.failure_kind.map(|k| k.label()).unwrap_or("error");
            writeln!(output, "Error ({kind}): {}", self.colorize(error, |s| s.red()))?;
        }

        let Some(result) = &job.result else {
            return Ok(output);
        };

        writeln!(
            output,
            "Rows: {} -> {} ({} removed) in {} ({})",
            result.total_rows_before,
            result.total_rows_after,
            result.total_rows_removed,
            format_elapsed(result.duration_seconds),
            format_row_rate(
                result.total_rows_before,
                Duration::from_secs_f64(result.duration_seconds.max(0.0))
            )
        )?;

        if !result.stages.is_empty() {
            writeln!(output, "\nStages:")?;
        }
        for stage in &result.stages {
            let note = if stage.failed {
                self.colorize(" failed", |s| s.red())
            } else if stage.skipped {
                self.colorize(" skipped", |s| s.yellow())
            } else {
                String::new()
            };
            writeln!(
                output,
                "  {}. {}{note}  {} -> {} (-{})  {} ms",
                stage.position + 1,
                self.colorize(&stage.stage, |s| s.cyan()),
                stage.rows_before,
                stage.rows_after,
                stage.rows_removed,
                stage.duration_ms
            )?;
            for (key, value) in &stage.metadata {
                writeln!(output, "       {key}: {value}")?;
            }
        }

        if !result.warnings.is_empty() {
            writeln!(output, "\nWarnings:")?;
            for warning in &result.warnings {
                writeln!(output, "  {}", self.colorize(warning, |s| s.yellow()))?;
            }
        }

        if !result.artifacts.is_empty() {
            writeln!(output, "\nArtifacts:")?;
            for artifact in &result.artifacts {
                writeln!(
                    output,
                    "  {} ({}, {}) {}",
                    artifact.name,
                    artifact.content_type,
                    format_bytes(artifact.size_bytes),
                    artifact.reference
                )?;
            }
        }

        Ok(output)
    }

    fn format_stages(&self, stages: &[StageSchema]) -> Result<String> {
        let mut output = String::new();

        for schema in stages {
            writeln!(
                output,
                "{}  {}",
                self.colorize(schema.id, |s| s.bold()),
                schema.description
            )?;
            for field in &schema.fields {
                writeln!(
                    output,
                    "    {} ({}, default {}) {}",
                    self.colorize(field.name, |s| s.cyan()),
                    describe_kind(&field.kind),
                    field.default,
                    field.description
                )?;
            }
            writeln!(output)?;
        }

        Ok(output)
    }

    fn format_preview(&self, preview: &DatasetPreview) -> Result<String> {
        let mut output = String::new();

        let header: Vec<String> = preview
            .columns
            .iter()
            .map(|c| truncate(c, MAX_CELL_WIDTH))
            .collect();
        writeln!(output, "{}", self.colorize(&header.join("\t"), |s| s.bold()))?;

        for row in &preview.rows {
            let cells: Vec<String> = preview
                .columns
                .iter()
                .map(|column| match row.get(column) {
                    None | Some(serde_json::Value::Null) => String::new(),
                    Some(serde_json::Value::String(s)) => truncate(s, MAX_CELL_WIDTH),
                    Some(other) => truncate(&other.to_string(), MAX_CELL_WIDTH),
                })
                .collect();
            writeln!(output, "{}", cells.join("\t"))?;
        }

        writeln!(
            output,
            "\n({} of {} rows)",
            preview.rows.len(),
            preview.total_rows
        )?;

        Ok(output)
    }
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        if self.pretty {
            Ok(serde_json::to_string_pretty(value)?)
        } else {
            Ok(serde_json::to_string(value)?)
        }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_dataset(&self, dataset: &Dataset, stats: Option<&DatasetStats>) -> Result<String> {
        self.render(&json!({
            "dataset": dataset,
            "stats": stats,
        }))
    }

    fn format_job(&self, job: &Job) -> Result<String> {
        self.render(job)
    }

    fn format_stages(&self, stages: &[StageSchema]) -> Result<String> {
        self.render(stages)
    }

    fn format_preview(&self, preview: &DatasetPreview) -> Result<String> {
        self.render(preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataforge_core::stages::StageRegistry;

    #[test]
    fn test_truncate_long_cells() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_describe_number_bounds() {
        let kind = FieldKind::Number {
            min: Some(0.0),
            max: Some(1.0),
            integer: false,
        };
        assert_eq!(describe_kind(&kind), "number 0..=1");
        assert_eq!(
            describe_kind(&FieldKind::Choice {
                choices: &["exact", "semantic"]
            }),
            "one of exact|semantic"
        );
    }

    #[test]
    fn test_text_stage_catalog_lists_every_stage() {
        let stages = StageRegistry::builtin().describe();
        let text = TextFormatter::new(false).format_stages(&stages).unwrap();
        for id in [
            "deduplication",
            "noise_removal",
            "pii_scrubbing",
            "language_filter",
            "quality_scorer",
        ] {
            assert!(text.contains(id), "missing {id}");
        }
    }

    #[test]
    fn test_json_stage_catalog_is_an_array() {
        let stages = StageRegistry::builtin().describe();
        let json = JsonFormatter::new(false).format_stages(&stages).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 5);
    }
}
