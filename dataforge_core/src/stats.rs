//! Per-column dataset statistics computed once ingestion reaches `ready`

use crate::table::{Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Number of non-null sample values kept per column
pub const SAMPLE_VALUES: usize = 5;

/// Rough tokens-per-character ratio used for token estimates
pub const TOKENS_PER_CHAR: f64 = 0.75;

/// Statistics for a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub dtype: String,
    pub null_count: usize,
    pub null_percentage: f64,
    pub unique_count: usize,
    pub sample_values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
}

/// Whole-dataset statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnStats>,
    pub estimated_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
}

impl DatasetStats {
    /// Compute statistics for every column of a table
    pub fn compute(table: &Table) -> Self {
        let columns = table
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, name)| column_stats(table, idx, name))
            .collect();

        Self {
            row_count: table.row_count(),
            column_count: table.column_count(),
            columns,
            estimated_tokens: estimate_tokens(table),
            detected_language: None,
        }
    }

    /// Stats for a named column
    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.iter().find(|c| c.name == name)
    }
}

fn column_stats(table: &Table, idx: usize, name: &str) -> ColumnStats {
    let total = table.row_count();
    let non_null: Vec<&Value> = table.column_values(idx).filter(|v| !v.is_null()).collect();
    let null_count = total - non_null.len();

    let unique: HashSet<(&'static str, String)> = non_null
        .iter()
        .map(|v| (v.type_name(), v.display().into_owned()))
        .collect();

    let dtype = infer_dtype(&non_null);
    let numeric: Vec<f64> = if dtype == "int64" || dtype == "float64" {
        non_null.iter().filter_map(|v| v.as_f64()).collect()
    } else {
        Vec::new()
    };

    let (min, max, mean, std) = numeric_summary(&numeric);

    ColumnStats {
        name: name.to_string(),
        dtype: dtype.to_string(),
        null_count,
        null_percentage: if total > 0 {
            round2(null_count as f64 / total as f64 * 100.0)
        } else {
            0.0
        },
        unique_count: unique.len(),
        sample_values: non_null
            .iter()
            .take(SAMPLE_VALUES)
            .map(|v| (*v).clone())
            .collect(),
        min,
        max,
        mean,
        std,
    }
}

fn infer_dtype(values: &[&Value]) -> &'static str {
    if values.is_empty() {
        return "empty";
    }
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        "int64"
    } else if values
        .iter()
        .all(|v| matches!(v, Value::Int(_) | Value::Float(_)))
    {
        "float64"
    } else if values.iter().all(|v| matches!(v, Value::Bool(_))) {
        "bool"
    } else {
        "object"
    }
}

/// Min, max, mean and sample standard deviation
fn numeric_summary(values: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None, None, None);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(variance.sqrt())
    } else {
        None
    };
    (Some(min), Some(max), Some(mean), std)
}

/// Character-based token estimate over every non-null cell
pub fn estimate_tokens(table: &Table) -> u64 {
    let chars: usize = table
        .rows()
        .iter()
        .flat_map(|row| row.iter())
        .filter(|v| !v.is_null())
        .map(|v| v.display().chars().count())
        .sum();
    (chars as f64 * TOKENS_PER_CHAR) as u64
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        let mut t = Table::new(["score", "label"]);
        t.push_row(vec![Value::Int(2), "a".into()]);
        t.push_row(vec![Value::Int(4), "b".into()]);
        t.push_row(vec![Value::Null, "a".into()]);
        t.push_row(vec![Value::Int(6), Value::Null]);
        t
    }

    #[test]
    fn test_numeric_column_stats() {
        let stats = DatasetStats::compute(&table());
        let score = stats.column("score").unwrap();
        assert_eq!(score.dtype, "int64");
        assert_eq!(score.null_count, 1);
        assert_eq!(score.null_percentage, 25.0);
        assert_eq!(score.unique_count, 3);
        assert_eq!(score.min, Some(2.0));
        assert_eq!(score.max, Some(6.0));
        assert_eq!(score.mean, Some(4.0));
        assert_eq!(score.std, Some(2.0));
    }

    #[test]
    fn test_text_column_stats() {
        let stats = DatasetStats::compute(&table());
        let label = stats.column("label").unwrap();
        assert_eq!(label.dtype, "object");
        assert_eq!(label.unique_count, 2);
        assert_eq!(label.sample_values.len(), 3);
        assert!(label.mean.is_none());
    }

    #[test]
    fn test_sample_values_are_bounded() {
        let mut t = Table::new(["n"]);
        for i in 0..20 {
            t.push_row(vec![Value::Int(i)]);
        }
        let stats = DatasetStats::compute(&t);
        assert_eq!(stats.columns[0].sample_values.len(), SAMPLE_VALUES);
    }

    #[test]
    fn test_estimate_tokens() {
        let mut t = Table::new(["text"]);
        t.push_row(vec!["abcd".into()]);
        assert_eq!(estimate_tokens(&t), 3);
    }
}
