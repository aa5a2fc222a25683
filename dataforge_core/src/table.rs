//! In-memory tabular representation shared by ingestion and stages
//!
//! A [`Table`] is a list of named columns plus row-major cells. Every row has
//! exactly one cell per column; helpers that add or remove columns keep that
//! invariant.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Infer a typed value from a raw delimited-text field
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            // keep leading zeros as text ("007" is an identifier, not 7)
            if !(trimmed.len() > 1 && trimmed.starts_with('0')) {
                return Value::Int(i);
            }
        }
        if trimmed.contains('.') || trimmed.contains('e') || trimmed.contains('E') {
            if let Ok(f) = trimmed.parse::<f64>() {
                if f.is_finite() {
                    return Value::Float(f);
                }
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(raw.to_string()),
        }
    }

    /// Convert a JSON value into a cell; nested values are kept as JSON text
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }

    /// Convert the cell into a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the string content of a text cell
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the cell (booleans are not numbers here)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Rendering used for hashing, text scans and delimited export
    pub fn display(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Bool(b) => Cow::Owned(b.to_string()),
            Value::Int(i) => Cow::Owned(i.to_string()),
            Value::Float(f) => Cow::Owned(f.to_string()),
            Value::Text(s) => Cow::Borrowed(s),
        }
    }

    /// Short type name used in stats and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One row of cells, positionally aligned with [`Table::columns`]
pub type Row = Vec<Value>;

/// Materialized dataset: ordered columns and row-major cells
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from columns and rows, padding or truncating ragged rows
    ///
    /// Returns the table plus the number of rows that had to be adjusted.
    pub fn from_ragged(columns: Vec<String>, rows: Vec<Row>) -> (Self, usize) {
        let width = columns.len();
        let mut adjusted = 0;
        let rows = rows
            .into_iter()
            .map(|mut row| {
                if row.len() != width {
                    adjusted += 1;
                    row.resize(width, Value::Null);
                }
                row
            })
            .collect();
        (Self { columns, rows }, adjusted)
    }

    /// Append a row; short rows are padded with nulls and long rows truncated
    pub fn push_row(&mut self, mut row: Row) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a named column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate over one column's cells
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[index])
    }

    /// Cell at (row, column)
    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Add a column, or overwrite it when a column of that name already exists
    ///
    /// `values` is padded with nulls or truncated to the row count.
    pub fn set_column(&mut self, name: &str, mut values: Vec<Value>) {
        values.resize(self.rows.len(), Value::Null);
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    /// Keep only rows whose mask entry is true; returns the number removed
    pub fn retain_mask(&mut self, keep: &[bool]) -> usize {
        let before = self.rows.len();
        let mut idx = 0;
        self.rows.retain(|_| {
            let keep_row = keep.get(idx).copied().unwrap_or(true);
            idx += 1;
            keep_row
        });
        before - self.rows.len()
    }

    /// First `n` rows as a new table
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Columns whose non-null cells are mostly text
    pub fn text_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&idx| {
                let (text, non_null) =
                    self.column_values(idx)
                        .fold((0usize, 0usize), |(t, n), v| match v {
                            Value::Null => (t, n),
                            Value::Text(_) => (t + 1, n + 1),
                            _ => (t, n + 1),
                        });
                non_null > 0 && text * 2 >= non_null
            })
            .collect()
    }

    /// Text column with the longest average content, used as the default text field
    pub fn primary_text_column(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for idx in self.text_columns() {
            let (total, count) = self
                .column_values(idx)
                .filter_map(Value::as_text)
                .fold((0usize, 0usize), |(t, c), s| (t + s.chars().count(), c + 1));
            let avg = if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            };
            if best.is_none_or(|(_, b)| avg > b) {
                best = Some((idx, avg));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Rows rendered as JSON objects keyed by column name
    pub fn to_json_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), v.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Build a table from JSON objects, using the union of keys in first-seen order
    pub fn from_json_records(records: Vec<serde_json::Map<String, serde_json::Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in &records {
            for key in record.keys() {
                if !positions.contains_key(key) {
                    positions.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let width = columns.len();
        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = vec![Value::Null; width];
                for (key, value) in record {
                    if let Some(&idx) = positions.get(&key) {
                        row[idx] = Value::from_json(value);
                    }
                }
                row
            })
            .collect();

        Self { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        let mut table = Table::new(["id", "text"]);
        table.push_row(vec![Value::Int(1), "short".into()]);
        table.push_row(vec![Value::Int(2), "a much longer piece of text".into()]);
        table
    }

    #[test]
    fn test_infer_values() {
        assert_eq!(Value::infer(""), Value::Null);
        assert_eq!(Value::infer("42"), Value::Int(42));
        assert_eq!(Value::infer("007"), Value::Text("007".to_string()));
        assert_eq!(Value::infer("3.5"), Value::Float(3.5));
        assert_eq!(Value::infer("TRUE"), Value::Bool(true));
        assert_eq!(Value::infer("hello"), Value::Text("hello".to_string()));
    }

    #[test]
    fn test_push_row_pads_short_rows() {
        let mut table = Table::new(["a", "b", "c"]);
        table.push_row(vec![Value::Int(1)]);
        assert_eq!(table.rows()[0].len(), 3);
        assert!(table.rows()[0][2].is_null());
    }

    #[test]
    fn test_from_ragged_counts_adjustments() {
        let (table, adjusted) = Table::from_ragged(
            vec!["a".into(), "b".into()],
            vec![
                vec![Value::Int(1), Value::Int(2)],
                vec![Value::Int(3)],
                vec![Value::Int(4), Value::Int(5), Value::Int(6)],
            ],
        );
        assert_eq!(adjusted, 2);
        assert!(table.rows().iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_set_column_adds_then_overwrites() {
        let mut table = sample();
        table.set_column("flag", vec![Value::Bool(true)]);
        assert_eq!(table.column_count(), 3);
        assert!(table.rows()[1][2].is_null());

        table.set_column("flag", vec![Value::Bool(false), Value::Bool(false)]);
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.rows()[0][2], Value::Bool(false));
    }

    #[test]
    fn test_retain_mask() {
        let mut table = sample();
        let removed = table.retain_mask(&[false, true]);
        assert_eq!(removed, 1);
        assert_eq!(table.rows()[0][0], Value::Int(2));
    }

    #[test]
    fn test_primary_text_column() {
        let table = sample();
        assert_eq!(table.text_columns(), vec![1]);
        assert_eq!(table.primary_text_column(), Some(1));
    }

    #[test]
    fn test_json_records_union_keys() {
        let records = vec![
            json!({"a": 1, "b": "x"}).as_object().unwrap().clone(),
            json!({"c": true, "a": 2}).as_object().unwrap().clone(),
        ];
        let table = Table::from_json_records(records);
        assert_eq!(table.columns(), &["a", "b", "c"]);
        assert_eq!(table.rows()[1], vec![Value::Int(2), Value::Null, Value::Bool(true)]);
        assert_eq!(table.to_json_records()[0]["b"], json!("x"));
    }
}
