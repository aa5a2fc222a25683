//! Decoders turning classified bytes into a [`Table`]

use super::DatasetFormat;
use super::binary;
use crate::error::{IngestionError, Result};
use crate::table::{Row, Table, Value};
use crate::text;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Map;
use std::collections::HashMap;

static PAGE_CHROME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(nav|footer|header)\b[^>]*>.*?</(nav|footer|header)\s*>")
        .expect("valid page chrome pattern")
});

static HTML_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").expect("valid table pattern"));

static HTML_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").expect("valid row pattern"));

static HTML_CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(th|td)\b[^>]*>(.*?)</t[hd]\s*>").expect("valid cell pattern")
});

static HTML_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(p|h[1-6]|li)\b[^>]*>(.*?)</(?:p|h[1-6]|li)\s*>")
        .expect("valid block pattern")
});

/// Decoded table plus non-fatal issues
#[derive(Debug, Clone)]
pub struct Decoded {
    pub table: Table,
    pub warnings: Vec<String>,
}

/// Decode bytes of a known format into a table
///
/// Fails when the content does not match the format or when nothing
/// parseable remains; ragged or partially broken input only adds warnings.
pub fn decode(bytes: &[u8], format: DatasetFormat) -> Result<Decoded> {
    let decoded = match format {
        DatasetFormat::Parquet => binary::parse_parquet(bytes)?,
        DatasetFormat::Xlsx => binary::parse_spreadsheet(bytes)?,
        DatasetFormat::Docx => binary::parse_docx(bytes)?,
        DatasetFormat::Pdf => binary::parse_pdf(bytes)?,
        _ => decode_text(bytes, format)?,
    };

    if decoded.table.is_empty() {
        return Err(IngestionError::malformed(format.as_str(), "no rows could be parsed").into());
    }
    Ok(decoded)
}

fn decode_text(bytes: &[u8], format: DatasetFormat) -> Result<Decoded> {
    let mut warnings = Vec::new();
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = match std::str::from_utf8(body) {
        Ok(text) => std::borrow::Cow::Borrowed(text),
        Err(_) => {
            warnings.push("invalid UTF-8 sequences were replaced".to_string());
            String::from_utf8_lossy(body)
        }
    };

    let mut decoded = match format {
        DatasetFormat::Csv => parse_delimited(&text, b',', format)?,
        DatasetFormat::Tsv => parse_delimited(&text, b'\t', format)?,
        DatasetFormat::Json => parse_json(&text)?,
        DatasetFormat::Jsonl => parse_jsonl(&text)?,
        DatasetFormat::Txt | DatasetFormat::Md => parse_lines(&text),
        DatasetFormat::Html => parse_html(&text),
        DatasetFormat::Parquet | DatasetFormat::Xlsx | DatasetFormat::Pdf | DatasetFormat::Docx => {
            return Err(IngestionError::unsupported_format(format.as_str(), "not a text format").into());
        }
    };

    warnings.append(&mut decoded.warnings);
    decoded.warnings = warnings;
    Ok(decoded)
}

fn parse_delimited(text: &str, delimiter: u8, format: DatasetFormat) -> Result<Decoded> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| IngestionError::malformed(format.as_str(), &e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Err(IngestionError::malformed(format.as_str(), "missing header row").into());
    }
    let columns = normalize_headers(headers.iter());

    let mut rows: Vec<Row> = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        match record {
            Ok(record) => rows.push(record.iter().map(Value::infer).collect()),
            Err(e) => {
                skipped += 1;
                log::debug!("Skipping unparseable {format} record: {e}");
            }
        }
    }

    let (table, ragged) = Table::from_ragged(columns, rows);
    let mut warnings = Vec::new();
    if ragged > 0 {
        warnings.push(format!(
            "{ragged} rows had a field count different from the header and were padded or truncated"
        ));
    }
    if skipped > 0 {
        warnings.push(format!("{skipped} unparseable rows were skipped"));
    }
    Ok(Decoded { table, warnings })
}

/// Blank headers become `column_N`; repeated names get a `.N` suffix
pub(super) fn normalize_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.enumerate()
        .map(|(idx, name)| {
            let name = name.trim();
            let base = if name.is_empty() {
                format!("column_{idx}")
            } else {
                name.to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let unique = if *count == 0 {
                base
            } else {
                format!("{base}.{count}")
            };
            *count += 1;
            unique
        })
        .collect()
}

fn parse_json(text: &str) -> Result<Decoded> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => Ok(Decoded {
            table: Table::from_json_records(items.into_iter().map(into_record).collect()),
            warnings: Vec::new(),
        }),
        Ok(serde_json::Value::Object(map)) => {
            let mut flat = Map::new();
            flatten("", map, &mut flat);
            Ok(Decoded {
                table: Table::from_json_records(vec![flat]),
                warnings: Vec::new(),
            })
        }
        Ok(other) => Ok(Decoded {
            table: Table::from_json_records(vec![into_record(other)]),
            warnings: Vec::new(),
        }),
        Err(err) => {
            let mut decoded = parse_jsonl(text)
                .map_err(|_| IngestionError::malformed("json", &err.to_string()))?;
            decoded
                .warnings
                .push("content is not a single JSON document; parsed as JSON lines".to_string());
            Ok(decoded)
        }
    }
}

fn parse_jsonl(text: &str) -> Result<Decoded> {
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => records.push(into_record(value)),
            Err(e) => {
                skipped += 1;
                if skipped <= 10 {
                    log::warn!("Skipped malformed JSON line {}: {e}", line_no + 1);
                }
            }
        }
    }

    if records.is_empty() {
        return Err(IngestionError::malformed("jsonl", "no parseable lines").into());
    }

    let mut warnings = Vec::new();
    if skipped > 0 {
        warnings.push(format!("{skipped} malformed JSON lines were skipped"));
    }
    Ok(Decoded {
        table: Table::from_json_records(records),
        warnings,
    })
}

fn into_record(value: serde_json::Value) -> Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Flatten nested objects into dotted keys
fn flatten(prefix: &str, map: Map<String, serde_json::Value>, out: &mut Map<String, serde_json::Value>) {
    for (key, value) in map {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            serde_json::Value::Object(inner) => flatten(&key, inner, out),
            other => {
                out.insert(key, other);
            }
        }
    }
}

fn parse_lines(text: &str) -> Decoded {
    let mut table = Table::new(["line_number", "text"]);
    for (idx, line) in text.lines().enumerate() {
        table.push_row(vec![Value::Int(idx as i64 + 1), Value::Text(line.to_string())]);
    }
    Decoded {
        table,
        warnings: Vec::new(),
    }
}

/// First `<table>` if present, then block elements, then visible text lines
fn parse_html(text: &str) -> Decoded {
    let cleaned = PAGE_CHROME.replace_all(text, " ");

    if let Some(table) = HTML_TABLE
        .captures(&cleaned)
        .and_then(|caps| caps.get(1).map(|m| html_table(m.as_str())))
        .filter(|t| !t.is_empty())
    {
        return Decoded {
            table,
            warnings: Vec::new(),
        };
    }

    let mut blocks = Table::new(["element", "text"]);
    for caps in HTML_BLOCK.captures_iter(&cleaned) {
        let content = visible_text(&caps[2]);
        if !content.is_empty() {
            blocks.push_row(vec![
                Value::Text(caps[1].to_ascii_lowercase()),
                Value::Text(content),
            ]);
        }
    }
    if !blocks.is_empty() {
        return Decoded {
            table: blocks,
            warnings: Vec::new(),
        };
    }

    let visible = text::strip_html(&cleaned);
    let mut lines = Table::new(["line_number", "text"]);
    for (idx, line) in visible
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        lines.push_row(vec![Value::Int(idx as i64 + 1), Value::Text(line.to_string())]);
    }
    Decoded {
        table: lines,
        warnings: vec!["no tables or text blocks found; using visible text lines".to_string()],
    }
}

fn html_table(inner: &str) -> Table {
    let mut parsed: Vec<(bool, Vec<String>)> = HTML_ROW
        .captures_iter(inner)
        .map(|row| {
            let cells: Vec<(bool, String)> = HTML_CELL
                .captures_iter(&row[1])
                .map(|cell| (cell[1].eq_ignore_ascii_case("th"), visible_text(&cell[2])))
                .collect();
            let all_header = !cells.is_empty() && cells.iter().all(|(h, _)| *h);
            (all_header, cells.into_iter().map(|(_, c)| c).collect::<Vec<_>>())
        })
        .filter(|(_, cells)| !cells.is_empty())
        .collect();

    if parsed.is_empty() {
        return Table::default();
    }

    let columns = if parsed[0].0 {
        let (_, header) = parsed.remove(0);
        normalize_headers(header.iter().map(String::as_str))
    } else {
        let width = parsed.iter().map(|(_, c)| c.len()).max().unwrap_or(0);
        (0..width).map(|i| i.to_string()).collect()
    };

    let rows = parsed
        .into_iter()
        .map(|(_, cells)| cells.iter().map(|c| Value::infer(c)).collect())
        .collect();
    Table::from_ragged(columns, rows).0
}

fn visible_text(fragment: &str) -> String {
    text::normalize_whitespace(&text::strip_html(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_csv_warns() {
        let decoded = decode(b"a,b\n1,2\n3\n4,5,6\n", DatasetFormat::Csv).unwrap();
        assert_eq!(decoded.table.row_count(), 3);
        assert!(decoded.warnings[0].contains("2 rows"));
        assert_eq!(decoded.table.rows()[1][1], Value::Null);
    }

    #[test]
    fn test_duplicate_and_blank_headers() {
        let decoded = decode(b"name,,name\nx,y,z\n", DatasetFormat::Csv).unwrap();
        assert_eq!(decoded.table.columns(), &["name", "column_1", "name.1"]);
    }

    #[test]
    fn test_tsv_values_are_typed() {
        let decoded = decode(b"id\tscore\n1\t2.5\n", DatasetFormat::Tsv).unwrap();
        assert_eq!(decoded.table.rows()[0], vec![Value::Int(1), Value::Float(2.5)]);
    }

    #[test]
    fn test_json_object_is_flattened() {
        let decoded = decode(br#"{"meta": {"lang": "en"}, "n": 1}"#, DatasetFormat::Json).unwrap();
        assert_eq!(decoded.table.columns(), &["meta.lang", "n"]);
        assert_eq!(decoded.table.row_count(), 1);
    }

    #[test]
    fn test_json_array_of_scalars() {
        let decoded = decode(b"[1, 2, 3]", DatasetFormat::Json).unwrap();
        assert_eq!(decoded.table.columns(), &["value"]);
        assert_eq!(decoded.table.row_count(), 3);
    }

    #[test]
    fn test_json_falls_back_to_lines() {
        let decoded = decode(b"{\"a\":1}\n{\"a\":2}\n", DatasetFormat::Json).unwrap();
        assert_eq!(decoded.table.row_count(), 2);
        assert!(decoded.warnings.iter().any(|w| w.contains("JSON lines")));
    }

    #[test]
    fn test_jsonl_skips_bad_lines() {
        let decoded = decode(b"{\"a\":1}\nnot json\n\n{\"b\":2}\n", DatasetFormat::Jsonl).unwrap();
        assert_eq!(decoded.table.row_count(), 2);
        assert_eq!(decoded.table.columns(), &["a", "b"]);
        assert!(decoded.warnings[0].contains("1 malformed"));
    }

    #[test]
    fn test_text_lines() {
        let decoded = decode(b"first\n\nthird\n", DatasetFormat::Txt).unwrap();
        assert_eq!(decoded.table.row_count(), 3);
        assert_eq!(decoded.table.rows()[2][0], Value::Int(3));
    }

    #[test]
    fn test_lossy_utf8_warns() {
        let decoded = decode(b"caf\xe9\n", DatasetFormat::Txt).unwrap();
        assert!(decoded.warnings[0].contains("UTF-8"));
    }

    #[test]
    fn test_html_table_extraction() {
        let html = b"<html><body><table><tr><th>Name</th><th>Age</th></tr>\
            <tr><td>Ann</td><td>31</td></tr></table></body></html>";
        let decoded = decode(html, DatasetFormat::Html).unwrap();
        assert_eq!(decoded.table.columns(), &["Name", "Age"]);
        assert_eq!(decoded.table.rows()[0], vec!["Ann".into(), Value::Int(31)]);
    }

    #[test]
    fn test_html_blocks_skip_chrome() {
        let html = b"<html><header><p>Site</p></header><h1>Title</h1><p>Body <b>text</b></p>\
            <script>x()</script></html>";
        let decoded = decode(html, DatasetFormat::Html).unwrap();
        assert_eq!(decoded.table.columns(), &["element", "text"]);
        assert_eq!(decoded.table.row_count(), 2);
        assert_eq!(decoded.table.rows()[1][1], Value::Text("Body text".to_string()));
    }

    #[test]
    fn test_header_only_csv_fails() {
        assert!(decode(b"a,b\n", DatasetFormat::Csv).is_err());
    }
}
