//! Format detection and decoding of raw dataset bytes
//!
//! [`detect`] classifies a payload and decodes it into a [`Table`]. Content
//! signatures and structural parse success take priority over the filename
//! extension, which only breaks ties.

use crate::error::{IngestionError, Result};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

mod binary;
mod detect;
mod parse;

pub use detect::{Classification, Evidence, classify};
pub use parse::{Decoded, decode};

/// Every format the registry understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Csv,
    Tsv,
    Json,
    Jsonl,
    Parquet,
    Xlsx,
    Pdf,
    Txt,
    Md,
    Html,
    Docx,
}

impl DatasetFormat {
    /// All formats, in declaration order
    pub const ALL: [DatasetFormat; 11] = [
        Self::Csv,
        Self::Tsv,
        Self::Json,
        Self::Jsonl,
        Self::Parquet,
        Self::Xlsx,
        Self::Pdf,
        Self::Txt,
        Self::Md,
        Self::Html,
        Self::Docx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Parquet => "parquet",
            Self::Xlsx => "xlsx",
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Html => "html",
            Self::Docx => "docx",
        }
    }

    /// Map a file extension (without dot, any case) to a format
    pub fn from_extension(ext: &str) -> Option<Self> {
        let format = match ext.to_ascii_lowercase().as_str() {
            "csv" => Self::Csv,
            "tsv" => Self::Tsv,
            "json" => Self::Json,
            "jsonl" | "ndjson" => Self::Jsonl,
            "parquet" | "pq" => Self::Parquet,
            "xlsx" | "xls" => Self::Xlsx,
            "txt" => Self::Txt,
            "md" | "markdown" => Self::Md,
            "pdf" => Self::Pdf,
            "html" | "htm" => Self::Html,
            "docx" => Self::Docx,
            _ => return None,
        };
        Some(format)
    }

    /// Format implied by a filename's extension
    pub fn from_filename(filename: &str) -> Option<Self> {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Binary container formats recognized by signature
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Parquet | Self::Xlsx | Self::Pdf | Self::Docx)
    }

    /// File extensions accepted for upload
    pub fn allowed_extensions() -> Vec<&'static str> {
        let mut exts = vec![
            "csv", "tsv", "json", "jsonl", "ndjson", "parquet", "pq", "xlsx", "xls", "txt", "md",
            "markdown", "pdf", "html", "htm", "docx",
        ];
        exts.sort_unstable();
        exts
    }
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatasetFormat {
    type Err = IngestionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_extension(s.trim_start_matches('.'))
            .ok_or_else(|| IngestionError::unsupported_format(s, "unknown format name"))
    }
}

/// A decoded payload ready for registration
#[derive(Debug, Clone)]
pub struct DetectedDataset {
    pub format: DatasetFormat,
    pub evidence: Evidence,
    pub table: Table,
    pub size_bytes: u64,
    /// Non-fatal issues found while decoding (ragged rows, skipped lines)
    pub warnings: Vec<String>,
}

impl DetectedDataset {
    pub fn columns(&self) -> &[String] {
        self.table.columns()
    }

    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }
}

/// Classify and decode a payload
///
/// `hint` is a format declared by a connector; it outranks the filename
/// extension but not a content signature.
pub fn detect(bytes: &[u8], filename: &str, hint: Option<DatasetFormat>) -> Result<DetectedDataset> {
    if bytes.is_empty() {
        return Err(IngestionError::empty_payload(filename).into());
    }

    let (format, evidence) = match classify(bytes, filename, hint) {
        Classification::Detected { format, evidence } => (format, evidence),
        Classification::Undetected { reason } => {
            return Err(IngestionError::undetected(filename, &reason).into());
        }
    };
    log::debug!("Classified '{filename}' as {format} via {evidence:?}");

    let decoded = decode(bytes, format)?;
    Ok(DetectedDataset {
        format,
        evidence,
        table: decoded.table,
        size_bytes: bytes.len() as u64,
        warnings: decoded.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_extension_map() {
        assert_eq!(DatasetFormat::from_filename("a.NDJSON"), Some(DatasetFormat::Jsonl));
        assert_eq!(DatasetFormat::from_filename("a.pq"), Some(DatasetFormat::Parquet));
        assert_eq!(DatasetFormat::from_filename("page.htm"), Some(DatasetFormat::Html));
        assert_eq!(DatasetFormat::from_filename("book.xls"), Some(DatasetFormat::Xlsx));
        assert_eq!(DatasetFormat::from_filename("noext"), None);
    }

    #[test]
    fn test_detect_csv() {
        let detected = detect(b"id,text\n1,hello\n2,world\n", "data.csv", None).unwrap();
        assert_eq!(detected.format, DatasetFormat::Csv);
        assert_eq!(detected.columns(), &["id", "text"]);
        assert_eq!(detected.row_count(), 2);
        assert_eq!(detected.size_bytes, 24);
    }

    #[test]
    fn test_structure_beats_extension() {
        let detected = detect(br#"[{"a": 1}, {"a": 2}]"#, "mislabeled.csv", None).unwrap();
        assert_eq!(detected.format, DatasetFormat::Json);
        assert_eq!(detected.evidence, Evidence::Structure);
        assert_eq!(detected.row_count(), 2);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let err = detect(b"", "empty.csv", None).unwrap_err();
        assert!(matches!(err, Error::Ingestion(IngestionError::EmptyPayload { .. })));
    }

    #[test]
    fn test_binary_without_signature_is_undetected() {
        let bytes = [0u8, 159, 146, 150, 0, 1, 2, 3, 0, 0];
        let err = detect(&bytes, "blob", None).unwrap_err();
        assert!(matches!(err, Error::Ingestion(IngestionError::Undetected { .. })));
    }

    #[test]
    fn test_broken_pdf_is_malformed() {
        let err = detect(b"%PDF-1.7 rest", "doc.pdf", None).unwrap_err();
        assert!(matches!(
            err,
            Error::Ingestion(IngestionError::Malformed { .. })
        ));
    }

    #[test]
    fn test_format_parse_from_name() {
        assert_eq!("jsonl".parse::<DatasetFormat>().unwrap(), DatasetFormat::Jsonl);
        assert!("exe".parse::<DatasetFormat>().is_err());
    }
}
