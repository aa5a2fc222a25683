//! Deduplication: exact content hashing and semantic near-duplicate removal

use super::models::cosine_similarity;
use super::{ConfigField, StageContext, StageDescriptor, StageKind, StageOptions, StageOutput};
use crate::error::{StageError, ValidationError};
use crate::table::{Row, Table, Value};
use sha1::{Digest, Sha1};
use std::collections::HashSet;

const METHODS: &[&str] = &["exact", "semantic", "both"];
const KEEP: &[&str] = &["first", "last"];

pub(super) fn descriptor() -> StageDescriptor {
    StageDescriptor {
        kind: StageKind::Deduplication,
        description: "Remove duplicate rows using exact hash matching or semantic similarity",
        schema,
        check,
        apply,
    }
}

fn schema() -> Vec<ConfigField> {
    vec![
        ConfigField::choice("method", METHODS, "exact", "Matching strategy"),
        ConfigField::list_or_all("columns", "all", "Columns compared when matching rows"),
        ConfigField::choice("keep", KEEP, "first", "Which occurrence of a duplicate survives"),
        ConfigField::number(
            "semantic_threshold",
            0.95,
            Some(0.0),
            Some(1.0),
            "Cosine similarity at or above which rows are near-duplicates",
        ),
    ]
}

fn check(_options: &StageOptions) -> Result<(), ValidationError> {
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    First,
    Last,
}

struct Settings<'a> {
    exact: bool,
    semantic: bool,
    keep: Keep,
    threshold: f64,
    columns: Option<&'a [String]>,
}

impl<'a> Settings<'a> {
    fn from_options(options: &'a StageOptions) -> Self {
        let method = options.text("method");
        Self {
            exact: matches!(method, "exact" | "both"),
            semantic: matches!(method, "semantic" | "both"),
            keep: if options.text("keep") == "last" {
                Keep::Last
            } else {
                Keep::First
            },
            threshold: options.number("semantic_threshold"),
            columns: options.selection("columns"),
        }
    }
}

fn apply(mut table: Table, options: &StageOptions, ctx: &StageContext) -> Result<StageOutput, StageError> {
    let settings = Settings::from_options(options);
    let mut warnings = Vec::new();

    let mut columns: Vec<usize> = match settings.columns {
        None => (0..table.column_count()).collect(),
        Some(names) => names.iter().filter_map(|n| table.column_index(n)).collect(),
    };
    if columns.is_empty() && settings.columns.is_some() {
        warnings.push("Specified columns not found, using all columns".to_string());
        columns = (0..table.column_count()).collect();
    }

    let mut exact_removed = 0;
    if settings.exact {
        let keep = exact_mask(table.rows(), &columns, settings.keep);
        exact_removed = table.retain_mask(&keep);
        log::debug!("Exact dedup removed {exact_removed} rows");
    }

    let mut semantic_removed = 0;
    if settings.semantic {
        let keep = semantic_mask(&table, &columns, settings.keep, settings.threshold, ctx);
        semantic_removed = table.retain_mask(&keep);
        log::debug!(
            "Semantic dedup removed {semantic_removed} rows (threshold {:.2})",
            settings.threshold
        );
    }

    let checked: Vec<String> = columns
        .iter()
        .map(|&idx| table.columns()[idx].clone())
        .collect();
    let mut output = StageOutput::new(table)
        .with_meta("exact_duplicates_removed", exact_removed)
        .with_meta("semantic_duplicates_removed", semantic_removed)
        .with_meta("method_used", options.text("method"))
        .with_meta("keep", options.text("keep"))
        .with_meta("columns_checked", checked);
    if settings.semantic {
        output = output
            .with_meta("similarity_model", ctx.similarity().name())
            .with_meta("semantic_threshold", settings.threshold);
    }
    Ok(output.with_warnings(warnings))
}

/// Stable content hash of the selected cells of a row
///
/// Each cell contributes its type tag and a length-prefixed rendering, so
/// `Null` differs from an empty string and `1` from `"1"`.
fn row_key(row: &Row, columns: &[usize]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for &idx in columns {
        let cell = row.get(idx).unwrap_or(&Value::Null);
        let tag: u8 = match cell {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
        };
        let rendered = cell.display();
        hasher.update([tag]);
        hasher.update((rendered.len() as u64).to_le_bytes());
        hasher.update(rendered.as_bytes());
    }
    let digest = hasher.finalize();
    let mut key = [0u8; 20];
    key.copy_from_slice(&digest);
    key
}

fn exact_mask(rows: &[Row], columns: &[usize], keep: Keep) -> Vec<bool> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut mask = vec![false; rows.len()];
    let mut visit = |idx: usize| {
        mask[idx] = seen.insert(row_key(&rows[idx], columns));
    };
    match keep {
        Keep::First => (0..rows.len()).for_each(&mut visit),
        Keep::Last => (0..rows.len()).rev().for_each(&mut visit),
    }
    mask
}

/// Near-duplicate removal with a fixed comparison order
///
/// Rows are visited in ascending order; each surviving row is compared with
/// every later surviving row. With `keep=first` the later row is dropped,
/// with `keep=last` the earlier one is.
fn semantic_mask(
    table: &Table,
    columns: &[usize],
    keep: Keep,
    threshold: f64,
    ctx: &StageContext,
) -> Vec<bool> {
    let model = ctx.similarity();
    let vectors: Vec<Vec<f32>> = table
        .rows()
        .iter()
        .map(|row| {
            let text = columns
                .iter()
                .filter_map(|&idx| row.get(idx))
                .map(|v| v.display())
                .collect::<Vec<_>>()
                .join(" ");
            model.embed(&text)
        })
        .collect();

    let n = vectors.len();
    let mut keep_row = vec![true; n];
    for i in 0..n {
        ctx.report_rows(i + 1, n);
        if !keep_row[i] {
            continue;
        }
        for j in (i + 1)..n {
            if !keep_row[j] || cosine_similarity(&vectors[i], &vectors[j]) < threshold {
                continue;
            }
            match keep {
                Keep::First => keep_row[j] = false,
                Keep::Last => {
                    keep_row[i] = false;
                    break;
                }
            }
        }
    }
    keep_row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::OptionValue;
    use std::collections::BTreeMap;

    fn options(pairs: &[(&str, OptionValue)]) -> StageOptions {
        let supplied: BTreeMap<_, _> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        descriptor().resolve(&supplied).unwrap()
    }

    fn table(rows: &[(&str, i64)]) -> Table {
        let mut table = Table::new(["text", "n"]);
        for (text, n) in rows {
            table.push_row(vec![Value::from(*text), Value::Int(*n)]);
        }
        table
    }

    fn run(table: Table, options: &StageOptions) -> StageOutput {
        apply(table, options, &StageContext::detached(StageKind::Deduplication)).unwrap()
    }

    #[test]
    fn test_exact_keep_first() {
        let input = table(&[("a", 1), ("b", 2), ("a", 1), ("a", 3)]);
        let output = run(input, &options(&[]));
        assert_eq!(output.table.row_count(), 3);
        assert_eq!(output.metadata["exact_duplicates_removed"], 1);
        assert_eq!(output.table.cell(2, 1), Some(&Value::Int(3)));
    }

    #[test]
    fn test_exact_keep_last_on_subset() {
        let input = table(&[("a", 1), ("b", 2), ("a", 3)]);
        let output = run(
            input,
            &options(&[("columns", ["text"].into()), ("keep", "last".into())]),
        );
        assert_eq!(output.table.row_count(), 2);
        assert_eq!(output.table.cell(0, 0), Some(&Value::from("b")));
        assert_eq!(output.table.cell(1, 1), Some(&Value::Int(3)));
    }

    #[test]
    fn test_missing_columns_fall_back_to_all() {
        let input = table(&[("a", 1), ("a", 1)]);
        let output = run(input, &options(&[("columns", ["nope"].into())]));
        assert_eq!(output.table.row_count(), 1);
        assert_eq!(output.warnings.len(), 1);
    }

    #[test]
    fn test_exact_is_idempotent() {
        let input = table(&[("a", 1), ("a", 1), ("b", 1), ("b", 1), ("c", 2)]);
        let opts = options(&[]);
        let first = run(input, &opts);
        let rows = first.table.row_count();
        let second = run(first.table, &opts);
        assert_eq!(second.table.row_count(), rows);
        assert_eq!(second.metadata["exact_duplicates_removed"], 0);
    }

    #[test]
    fn test_length_prefix_prevents_field_collisions() {
        let mut input = Table::new(["a", "b"]);
        input.push_row(vec!["ab".into(), "c".into()]);
        input.push_row(vec!["a".into(), "bc".into()]);
        let output = run(input, &options(&[]));
        assert_eq!(output.table.row_count(), 2);
    }

    #[test]
    fn test_cell_types_are_part_of_the_key() {
        let mut input = Table::new(["v"]);
        input.push_row(vec![Value::Null]);
        input.push_row(vec![Value::Text(String::new())]);
        input.push_row(vec![Value::Int(1)]);
        input.push_row(vec![Value::Text("1".to_string())]);
        input.push_row(vec![Value::Int(1)]);
        let output = run(input, &options(&[]));
        assert_eq!(output.table.row_count(), 4);
        assert_eq!(output.metadata["exact_duplicates_removed"], 1);
    }

    #[test]
    fn test_semantic_removes_near_duplicates() {
        let input = table(&[
            ("the quick brown fox jumps over the lazy dog", 1),
            ("The quick brown fox jumps over the lazy dog!", 2),
            ("completely different sentence about databases", 3),
        ]);
        let output = run(
            input,
            &options(&[
                ("method", "semantic".into()),
                ("columns", ["text"].into()),
                ("semantic_threshold", 0.9.into()),
            ]),
        );
        assert_eq!(output.table.row_count(), 2);
        assert_eq!(output.metadata["semantic_duplicates_removed"], 1);
        assert_eq!(output.table.cell(0, 1), Some(&Value::Int(1)));
        assert_eq!(output.metadata["similarity_model"], "bag-of-words");
    }

    #[test]
    fn test_semantic_keep_last() {
        let input = table(&[("hello world again", 1), ("Hello, world again", 2)]);
        let output = run(
            input,
            &options(&[
                ("method", "semantic".into()),
                ("columns", ["text"].into()),
                ("keep", "last".into()),
            ]),
        );
        assert_eq!(output.table.row_count(), 1);
        assert_eq!(output.table.cell(0, 1), Some(&Value::Int(2)));
    }
}
