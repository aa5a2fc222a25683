//! Format classification: signatures, structure checks, then extension

use super::DatasetFormat;
use super::binary::zip_container;

/// Bytes examined by the structural and delimiter heuristics
const SAMPLE_LEN: usize = 1024;

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Why a format was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// Magic bytes at the start of the payload
    Signature,
    /// The content parsed as a self-describing structure
    Structure,
    /// A connector declared the format
    Hint,
    /// Filename extension
    Extension,
    /// Delimiter or plain-text heuristics
    Heuristic,
}

/// Outcome of classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Detected {
        format: DatasetFormat,
        evidence: Evidence,
    },
    Undetected {
        reason: String,
    },
}

impl Classification {
    fn found(format: DatasetFormat, evidence: Evidence) -> Self {
        Self::Detected { format, evidence }
    }

    pub fn format(&self) -> Option<DatasetFormat> {
        match self {
            Self::Detected { format, .. } => Some(*format),
            Self::Undetected { .. } => None,
        }
    }
}

/// Classify a payload without decoding it
pub fn classify(bytes: &[u8], filename: &str, hint: Option<DatasetFormat>) -> Classification {
    let declared = hint
        .map(|f| (f, Evidence::Hint))
        .or_else(|| DatasetFormat::from_filename(filename).map(|f| (f, Evidence::Extension)));

    if let Some(format) = signature(bytes, declared.map(|(f, _)| f)) {
        return format;
    }

    let body = strip_bom(bytes);
    let head = String::from_utf8_lossy(&body[..body.len().min(SAMPLE_LEN)]);
    let sample = head.trim_start();

    if let Some(format) = structure(body, sample) {
        // a single-record JSON lines file also parses as one JSON object
        let format = match (format, declared) {
            (DatasetFormat::Json, Some((DatasetFormat::Jsonl, _))) if sample.starts_with('{') => {
                DatasetFormat::Jsonl
            }
            _ => format,
        };
        return Classification::found(format, Evidence::Structure);
    }

    if let Some((format, evidence)) = declared {
        return Classification::found(format, evidence);
    }

    if looks_binary(body) {
        return Classification::Undetected {
            reason: "binary content with no known signature".to_string(),
        };
    }

    if let Some(format) = delimited(sample) {
        return Classification::found(format, Evidence::Heuristic);
    }

    if std::str::from_utf8(body).is_err() {
        return Classification::Undetected {
            reason: "content is not valid UTF-8 and has no recognizable structure".to_string(),
        };
    }

    Classification::found(DatasetFormat::Txt, Evidence::Heuristic)
}

fn signature(bytes: &[u8], declared: Option<DatasetFormat>) -> Option<Classification> {
    if bytes.starts_with(b"%PDF") {
        return Some(Classification::found(DatasetFormat::Pdf, Evidence::Signature));
    }
    if bytes.starts_with(b"PAR1") {
        return Some(Classification::found(DatasetFormat::Parquet, Evidence::Signature));
    }
    if bytes.starts_with(ZIP_SIGNATURE) {
        // entry names outrank the declared format
        let format = zip_container(bytes).or(match declared {
            Some(format @ (DatasetFormat::Docx | DatasetFormat::Xlsx)) => Some(format),
            _ => None,
        });
        return Some(match format {
            Some(format) => Classification::found(format, Evidence::Signature),
            None => Classification::Undetected {
                reason: "zip container without spreadsheet or document entries".to_string(),
            },
        });
    }
    None
}

/// JSON, JSONL or an HTML document
fn structure(body: &[u8], sample: &str) -> Option<DatasetFormat> {
    if sample.starts_with('[') || sample.starts_with('{') {
        if serde_json::from_slice::<serde_json::Value>(body).is_ok() {
            return Some(DatasetFormat::Json);
        }
        if is_json_lines(body) {
            return Some(DatasetFormat::Jsonl);
        }
    }

    let lower = sample.to_ascii_lowercase();
    if lower.starts_with("<!doctype html") || lower.contains("<html") {
        return Some(DatasetFormat::Html);
    }
    None
}

/// At least two non-empty lines, the first parses, and most of the rest do
fn is_json_lines(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        return false;
    }
    if serde_json::from_str::<serde_json::Value>(lines[0]).is_err() {
        return false;
    }
    let parsed = lines
        .iter()
        .filter(|l| serde_json::from_str::<serde_json::Value>(l).is_ok())
        .count();
    parsed * 2 >= lines.len()
}

fn delimited(sample: &str) -> Option<DatasetFormat> {
    let first_line = sample.lines().next().unwrap_or_default();
    let tabs = sample.matches('\t').count();
    let commas = sample.matches(',').count();
    if tabs > commas && tabs > 3 && first_line.contains('\t') {
        return Some(DatasetFormat::Tsv);
    }
    if commas > 3 && first_line.contains(',') {
        return Some(DatasetFormat::Csv);
    }
    None
}

fn looks_binary(body: &[u8]) -> bool {
    let sample = &body[..body.len().min(SAMPLE_LEN)];
    if sample.contains(&0) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t'))
        .count();
    control * 10 > sample.len()
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn format_of(bytes: &[u8], filename: &str) -> Option<DatasetFormat> {
        classify(bytes, filename, None).format()
    }

    #[test]
    fn test_magic_signatures() {
        assert_eq!(format_of(b"%PDF-1.4", "x"), Some(DatasetFormat::Pdf));
        assert_eq!(format_of(b"PAR1....", "x.csv"), Some(DatasetFormat::Parquet));
    }

    fn zip_with(entries: &[&str]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for name in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"<x/>").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_zip_disambiguation_reads_entry_names() {
        let docx = zip_with(&["[Content_Types].xml", "word/document.xml"]);
        let xlsx = zip_with(&["xl/workbook.xml", "xl/sharedStrings.xml"]);
        assert_eq!(format_of(&docx, "upload"), Some(DatasetFormat::Docx));
        assert_eq!(format_of(&xlsx, "upload"), Some(DatasetFormat::Xlsx));
        assert_eq!(format_of(&zip_with(&["readme.txt"]), "upload"), None);
    }

    #[test]
    fn test_zip_entries_outrank_extension() {
        let xlsx = zip_with(&["xl/workbook.xml", "xl/media/word/logo.png"]);
        assert_eq!(format_of(&xlsx, "report.docx"), Some(DatasetFormat::Xlsx));
    }

    #[test]
    fn test_unreadable_zip_falls_back_to_extension() {
        assert_eq!(format_of(b"PK\x03\x04....", "a.docx"), Some(DatasetFormat::Docx));
        assert_eq!(format_of(b"PK\x03\x04....", "upload"), None);
    }

    #[test]
    fn test_jsonl_detection() {
        let body = b"{\"a\": 1}\n{\"a\": 2}\n{\"a\": 3}\n";
        assert_eq!(format_of(body, "records"), Some(DatasetFormat::Jsonl));
    }

    #[test]
    fn test_jsonl_with_bad_line_still_detected() {
        let body = b"{\"a\": 1}\n{oops\n{\"a\": 3}\n";
        assert_eq!(format_of(body, "records.txt"), Some(DatasetFormat::Jsonl));
    }

    #[test]
    fn test_html_document() {
        let body = b"<!DOCTYPE html><html><body><p>Hi</p></body></html>";
        assert_eq!(format_of(body, "page"), Some(DatasetFormat::Html));
    }

    #[test]
    fn test_delimited_sniffing() {
        assert_eq!(
            format_of(b"a,b,c\n1,2,3\n4,5,6\n", "data"),
            Some(DatasetFormat::Csv)
        );
        assert_eq!(
            format_of(b"a\tb\tc\n1\t2\t3\n", "data"),
            Some(DatasetFormat::Tsv)
        );
    }

    #[test]
    fn test_extension_breaks_ties() {
        assert_eq!(format_of(b"just words", "notes.md"), Some(DatasetFormat::Md));
        assert_eq!(format_of(b"x,y\n1,2\n", "t.tsv"), Some(DatasetFormat::Tsv));
    }

    #[test]
    fn test_hint_outranks_extension() {
        let c = classify(b"a\tb\n1\t2\n", "download.csv", Some(DatasetFormat::Tsv));
        assert_eq!(
            c,
            Classification::Detected {
                format: DatasetFormat::Tsv,
                evidence: Evidence::Hint
            }
        );
    }

    #[test]
    fn test_plain_text_fallback() {
        assert_eq!(format_of(b"hello there", "readme"), Some(DatasetFormat::Txt));
    }

    #[test]
    fn test_invalid_utf8_without_hint_is_undetected() {
        assert_eq!(format_of(b"caf\xe9 au lait", "note"), None);
    }

    #[test]
    fn test_bom_is_ignored() {
        assert_eq!(
            format_of(b"\xEF\xBB\xBF[{\"a\":1}]", "x"),
            Some(DatasetFormat::Json)
        );
    }
}
