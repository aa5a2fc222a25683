//! Decoders for binary container formats
//!
//! Parquet goes through the arrow reader, spreadsheets through calamine,
//! Word documents through their `word/document.xml` part and PDFs through
//! per-page text extraction. Spreadsheets and Parquet files keep their
//! columns; documents become `{paragraph_number, style, text}` or
//! `{page_number, text}` rows.

use super::parse::{Decoded, normalize_headers};
use crate::error::IngestionError;
use crate::table::{Row, Table, Value};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use bytes::Bytes;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use quick_xml::events::{BytesStart, Event};
use std::io::{Cursor, Read};

const PARQUET_BATCH_ROWS: usize = 8192;

/// Entry holding the body of a Word document
pub(super) const DOCX_BODY: &str = "word/document.xml";

/// Entry present in every Excel workbook
pub(super) const XLSX_WORKBOOK: &str = "xl/workbook.xml";

/// Style reported for paragraphs without an explicit one
const DEFAULT_PARAGRAPH_STYLE: &str = "Normal";

fn malformed(format: &str, error: impl std::fmt::Display) -> IngestionError {
    IngestionError::malformed(format, &error.to_string())
}

pub(super) fn parse_parquet(bytes: &[u8]) -> Result<Decoded, IngestionError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))
        .map_err(|e| malformed("parquet", e))?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();
    let reader = builder
        .with_batch_size(PARQUET_BATCH_ROWS)
        .build()
        .map_err(|e| malformed("parquet", e))?;

    let mut table = Table::new(columns.iter().cloned());
    let mut unreadable: Vec<String> = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| malformed("parquet", e))?;
        let rows = batch.num_rows();
        let values: Vec<Vec<Value>> = batch
            .columns()
            .iter()
            .zip(&columns)
            .map(|(array, name)| {
                column_values(array).unwrap_or_else(|| {
                    if !unreadable.contains(name) {
                        unreadable.push(name.clone());
                    }
                    vec![Value::Null; rows]
                })
            })
            .collect();
        for row in 0..rows {
            table.push_row(values.iter().map(|column| column[row].clone()).collect());
        }
    }
    log::debug!(
        "Read parquet file: {} rows x {} columns",
        table.row_count(),
        table.column_count()
    );

    let warnings = if unreadable.is_empty() {
        Vec::new()
    } else {
        vec![format!(
            "columns with unsupported types were read as nulls: {}",
            unreadable.join(", ")
        )]
    };
    Ok(Decoded { table, warnings })
}

/// Typed cells of an arrow column; `None` when the type cannot be rendered
fn column_values(array: &ArrayRef) -> Option<Vec<Value>> {
    let data_type = array.data_type();
    let values = if *data_type == DataType::Boolean {
        let array = array.as_boolean();
        (0..array.len())
            .map(|i| {
                if array.is_null(i) {
                    Value::Null
                } else {
                    Value::Bool(array.value(i))
                }
            })
            .collect()
    } else if data_type.is_integer() {
        let widened = cast(array.as_ref(), &DataType::Int64).ok()?;
        let array = widened.as_primitive::<Int64Type>();
        (0..array.len())
            .map(|i| {
                if array.is_null(i) {
                    Value::Null
                } else {
                    Value::Int(array.value(i))
                }
            })
            .collect()
    } else if data_type.is_floating() {
        let widened = cast(array.as_ref(), &DataType::Float64).ok()?;
        let array = widened.as_primitive::<Float64Type>();
        (0..array.len())
            .map(|i| {
                if array.is_null(i) {
                    Value::Null
                } else {
                    Value::Float(array.value(i))
                }
            })
            .collect()
    } else {
        let rendered = cast(array.as_ref(), &DataType::Utf8).ok()?;
        let array = rendered.as_string::<i32>();
        (0..array.len())
            .map(|i| {
                if array.is_null(i) {
                    Value::Null
                } else {
                    Value::Text(array.value(i).to_string())
                }
            })
            .collect()
    };
    Some(values)
}

/// First worksheet, with its first row as the header
pub(super) fn parse_spreadsheet(bytes: &[u8]) -> Result<Decoded, IngestionError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| malformed("xlsx", e))?;
    let sheets = workbook.sheet_names();
    let first = sheets
        .first()
        .cloned()
        .ok_or_else(|| IngestionError::malformed("xlsx", "workbook has no worksheets"))?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| malformed("xlsx", e))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Err(IngestionError::malformed(
            "xlsx",
            &format!("worksheet '{first}' is empty"),
        ));
    };
    let header: Vec<String> = header.iter().map(|cell| cell.to_string()).collect();
    let columns = normalize_headers(header.iter().map(String::as_str));
    let body: Vec<Row> = rows
        .map(|cells| cells.iter().map(cell_value).collect())
        .collect();

    let mut warnings = Vec::new();
    if sheets.len() > 1 {
        warnings.push(format!(
            "workbook has {} worksheets; only '{first}' was read",
            sheets.len()
        ));
    }
    Ok(Decoded {
        table: Table::from_ragged(columns, body).0,
        warnings,
    })
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Bool(b) => Value::Bool(*b),
        Data::Int(i) => Value::Int(*i),
        // whole numbers are stored as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::Int(*f as i64),
        Data::Float(f) => Value::Float(*f),
        Data::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

pub(super) fn parse_docx(bytes: &[u8]) -> Result<Decoded, IngestionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| malformed("docx", e))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| malformed("docx", format!("{DOCX_BODY}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| malformed("docx", e))?;

    let paragraphs = docx_paragraphs(&xml).map_err(|e| malformed("docx", e))?;
    let mut table = Table::new(["paragraph_number", "style", "text"]);
    for (idx, paragraph) in paragraphs.into_iter().enumerate() {
        let text = paragraph.text.trim();
        if !text.is_empty() {
            table.push_row(vec![
                Value::Int(idx as i64 + 1),
                Value::Text(paragraph.style),
                Value::Text(text.to_string()),
            ]);
        }
    }
    Ok(Decoded {
        table,
        warnings: Vec::new(),
    })
}

#[derive(Debug, PartialEq)]
struct Paragraph {
    style: String,
    text: String,
}

impl Paragraph {
    fn new() -> Self {
        Self {
            style: DEFAULT_PARAGRAPH_STYLE.to_string(),
            text: String::new(),
        }
    }

    fn set_style(&mut self, element: &BytesStart<'_>, decoder: quick_xml::encoding::Decoder) {
        if let Ok(Some(attr)) = element.try_get_attribute("w:val")
            && let Ok(value) = attr.decode_and_unescape_value(decoder)
        {
            self.style = value.into_owned();
        }
    }
}

/// Every `w:p` of a document body in order, empty ones included
fn docx_paragraphs(xml: &str) -> Result<Vec<Paragraph>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current: Option<Paragraph> = None;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.name().as_ref() {
                b"w:p" => current = Some(Paragraph::new()),
                b"w:t" => in_text = true,
                b"w:pStyle" => {
                    if let Some(paragraph) = current.as_mut() {
                        paragraph.set_style(&element, reader.decoder());
                    }
                }
                _ => {}
            },
            Event::Empty(element) => {
                let paragraph = current.as_mut();
                match (element.name().as_ref(), paragraph) {
                    (b"w:p", _) => paragraphs.push(Paragraph::new()),
                    (b"w:pStyle", Some(paragraph)) => paragraph.set_style(&element, reader.decoder()),
                    (b"w:tab", Some(paragraph)) => paragraph.text.push('\t'),
                    (b"w:br" | b"w:cr", Some(paragraph)) => paragraph.text.push('\n'),
                    _ => {}
                }
            }
            Event::Text(text) if in_text => {
                if let Some(paragraph) = current.as_mut() {
                    paragraph.text.push_str(&text.unescape()?);
                }
            }
            Event::End(element) => match element.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if let Some(paragraph) = current.take() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs)
}

/// One row per page with extractable text
///
/// Scanned pages carry no text layer and are skipped with a warning.
pub(super) fn parse_pdf(bytes: &[u8]) -> Result<Decoded, IngestionError> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| malformed("pdf", e))?;
    let pages = document.get_pages();

    let mut table = Table::new(["page_number", "text"]);
    let mut blank = 0usize;
    for &number in pages.keys() {
        match document.extract_text(&[number]) {
            Ok(text) if !text.trim().is_empty() => {
                table.push_row(vec![
                    Value::Int(i64::from(number)),
                    Value::Text(text.trim().to_string()),
                ]);
            }
            Ok(_) => blank += 1,
            Err(e) => {
                log::debug!("No text extracted from PDF page {number}: {e}");
                blank += 1;
            }
        }
    }

    let mut warnings = Vec::new();
    if blank > 0 {
        warnings.push(format!(
            "{blank} of {} pages had no extractable text",
            pages.len()
        ));
    }
    Ok(Decoded { table, warnings })
}

/// Classify a zip container by its entry names
///
/// `None` when the archive cannot be read or holds neither a workbook nor a
/// document body.
pub(super) fn zip_container(bytes: &[u8]) -> Option<super::DatasetFormat> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).ok()?;
    let (mut workbook, mut document) = (false, false);
    for name in archive.file_names() {
        match name {
            XLSX_WORKBOOK => workbook = true,
            DOCX_BODY => document = true,
            _ => {}
        }
    }
    match (workbook, document) {
        (true, false) => Some(super::DatasetFormat::Xlsx),
        (false, true) => Some(super::DatasetFormat::Docx),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
        <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report</w:t></w:r></w:p>
        <w:p/>
        <w:p><w:r><w:t>Fish &amp; chips</w:t><w:tab/><w:t>sold out</w:t></w:r></w:p>
        </w:body></w:document>"#;

    #[test]
    fn test_docx_paragraphs_keep_styles_and_runs() {
        let paragraphs = docx_paragraphs(BODY).unwrap();
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0].style, "Heading1");
        assert_eq!(paragraphs[0].text, "Quarterly report");
        assert_eq!(paragraphs[1].text, "");
        assert_eq!(paragraphs[2].style, "Normal");
        assert_eq!(paragraphs[2].text, "Fish & chips\tsold out");
    }

    #[test]
    fn test_text_outside_runs_is_ignored() {
        let xml = r#"<w:body><w:p><w:r><w:instrText>PAGE</w:instrText><w:t>kept</w:t></w:r></w:p></w:body>"#;
        let paragraphs = docx_paragraphs(xml).unwrap();
        assert_eq!(paragraphs[0].text, "kept");
    }

    #[test]
    fn test_spreadsheet_cells_are_typed() {
        assert_eq!(cell_value(&Data::Float(7.0)), Value::Int(7));
        assert_eq!(cell_value(&Data::Float(2.5)), Value::Float(2.5));
        assert_eq!(cell_value(&Data::Empty), Value::Null);
        assert_eq!(
            cell_value(&Data::String("x".to_string())),
            Value::Text("x".to_string())
        );
    }

    #[test]
    fn test_corrupt_containers_are_malformed() {
        for decode in [parse_parquet, parse_spreadsheet, parse_docx, parse_pdf] {
            let err = decode(b"PK\x03\x04 truncated").unwrap_err();
            assert!(matches!(err, IngestionError::Malformed { .. }));
        }
    }

    #[test]
    fn test_unreadable_zip_is_unclassified() {
        assert_eq!(zip_container(b"PK\x03\x04 truncated"), None);
    }
}
