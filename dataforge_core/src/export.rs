//! Serialization of transformed tables into downloadable artifacts

use crate::error::{InternalError, Result, ValidationError};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Artifact encodings a job can produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    #[default]
    Jsonl,
    Json,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [Self::Csv, Self::Jsonl, Self::Json];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
            Self::Json => "json",
        }
    }

    /// File extension, without the dot
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// MIME type served with the artifact
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Jsonl => "application/x-ndjson",
            Self::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|f| f.as_str()).collect();
                ValidationError::invalid_choice("export", "output_format", s, &allowed)
            })
    }
}

/// Encode a table
///
/// CSV writes nulls as empty fields; the JSON encodings keep typed values.
pub fn export(table: &Table, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => export_csv(table),
        ExportFormat::Jsonl => {
            let mut out = Vec::new();
            for record in table.to_json_records() {
                serde_json::to_writer(&mut out, &record)?;
                out.push(b'\n');
            }
            Ok(out)
        }
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(&table.to_json_records())?),
    }
}

fn export_csv(table: &Table) -> Result<Vec<u8>> {
    let csv_error = |e: csv::Error| InternalError::serialization(format!("csv export: {e}"));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.columns()).map_err(csv_error)?;
    for row in table.rows() {
        writer
            .write_record(row.iter().map(|v| v.display().into_owned()))
            .map_err(csv_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| InternalError::serialization(format!("csv export: {e}")).into())
}
