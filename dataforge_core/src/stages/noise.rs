//! Noise removal: text cleanup followed by an optional length filter
//!
//! Sub-operations run in a fixed order on every text cell of the selected
//! columns:
//!
//! 1. encoding repair (mojibake, replacement characters)
//! 2. HTML stripping
//! 3. unicode NFC normalization and zero-width character removal
//! 4. control character removal (newlines and tabs survive)
//! 5. whitespace normalization
//! 6. URL stripping
//! 7. custom regex patterns
//! 8. length filtering on the first selected column, using the cleaned text

use super::{
    ConfigField, StageContext, StageDescriptor, StageKind, StageOptions, StageOutput,
    select_text_columns,
};
use crate::error::{StageError, ValidationError};
use crate::table::{Table, Value};
use crate::text;
use regex::Regex;
use std::borrow::Cow;
use unicode_normalization::UnicodeNormalization;

pub(super) fn descriptor() -> StageDescriptor {
    StageDescriptor {
        kind: StageKind::NoiseRemoval,
        description: "Clean text: fix encoding, strip HTML, normalize whitespace and unicode",
        schema,
        check,
        apply,
    }
}

fn schema() -> Vec<ConfigField> {
    vec![
        ConfigField::list_or_all("columns", "all_text", "Columns to clean"),
        ConfigField::boolean("fix_encoding", true, "Repair mojibake and drop replacement characters"),
        ConfigField::boolean("strip_html", true, "Remove HTML markup"),
        ConfigField::boolean("normalize_unicode", true, "NFC-normalize and drop zero-width characters"),
        ConfigField::boolean("remove_control_chars", true, "Drop control characters except newline and tab"),
        ConfigField::boolean("normalize_whitespace", true, "Collapse runs of spaces and blank lines"),
        ConfigField::boolean("strip_urls", false, "Remove http(s) and www URLs"),
        ConfigField::list("custom_patterns", &[], "Extra regular expressions whose matches are removed"),
        ConfigField::integer("min_text_length", 0, Some(0), None, "Drop rows shorter than this (0 = no bound)"),
        ConfigField::integer("max_text_length", 0, Some(0), None, "Drop rows longer than this (0 = no bound)"),
    ]
}

fn check(options: &StageOptions) -> Result<(), ValidationError> {
    let min = options.count("min_text_length");
    let max = options.count("max_text_length");
    if min > 0 && max > 0 && min > max {
        return Err(ValidationError::conflict(
            StageKind::NoiseRemoval.id(),
            format!("min_text_length ({min}) is greater than max_text_length ({max})"),
        ));
    }
    Ok(())
}

struct Cleaner {
    fix_encoding: bool,
    strip_html: bool,
    normalize_unicode: bool,
    remove_control_chars: bool,
    normalize_whitespace: bool,
    strip_urls: bool,
    patterns: Vec<Regex>,
}

#[derive(Default)]
struct CleanStats {
    encoding_fixes: usize,
    html_stripped: usize,
    chars_cleaned: usize,
}

impl Cleaner {
    fn from_options(options: &StageOptions, warnings: &mut Vec<String>) -> Self {
        let patterns = options
            .get("custom_patterns")
            .and_then(|v| v.as_list())
            .unwrap_or_default()
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warnings.push(format!("Invalid regex pattern '{pattern}': {e}"));
                    None
                }
            })
            .collect();

        Self {
            fix_encoding: options.flag("fix_encoding"),
            strip_html: options.flag("strip_html"),
            normalize_unicode: options.flag("normalize_unicode"),
            remove_control_chars: options.flag("remove_control_chars"),
            normalize_whitespace: options.flag("normalize_whitespace"),
            strip_urls: options.flag("strip_urls"),
            patterns,
        }
    }

    fn clean(&self, input: &str, stats: &mut CleanStats) -> String {
        let mut current = input.to_string();

        if self.fix_encoding {
            if let Some(fixed) = text::fix_encoding(&current) {
                stats.encoding_fixes += 1;
                current = fixed;
            }
        }

        if self.strip_html {
            if let Cow::Owned(stripped) = text::strip_html(&current) {
                if stripped != current {
                    stats.html_stripped += 1;
                    current = stripped;
                }
            }
        }

        if self.normalize_unicode {
            let normalized: String = current.nfc().collect();
            current = text::remove_zero_width(&normalized).into_owned();
        }

        if self.remove_control_chars {
            current = text::remove_control_chars(&current).into_owned();
        }

        if self.normalize_whitespace {
            current = text::normalize_whitespace(&current);
        }

        if self.strip_urls {
            current = text::strip_urls(&current).into_owned();
        }

        for pattern in &self.patterns {
            current = pattern.replace_all(&current, "").into_owned();
        }

        stats.chars_cleaned += input.chars().count().abs_diff(current.chars().count());
        current
    }
}

fn apply(mut table: Table, options: &StageOptions, ctx: &StageContext) -> Result<StageOutput, StageError> {
    let rows_before = table.row_count();
    let mut warnings = Vec::new();

    let columns = select_text_columns(&table, options.selection("columns"));
    if columns.is_empty() {
        warnings.push("No text columns found for noise removal.".to_string());
        return Ok(StageOutput::new(table)
            .with_meta("encoding_fixes", 0)
            .with_meta("html_stripped", 0)
            .with_meta("rows_removed_by_length", 0)
            .with_meta("chars_cleaned_per_row_avg", 0.0)
            .with_warnings(warnings));
    }

    let cleaner = Cleaner::from_options(options, &mut warnings);
    let mut stats = CleanStats::default();
    let total = table.row_count();
    for (done, row) in table.rows_mut().iter_mut().enumerate() {
        for &idx in &columns {
            if let Some(Value::Text(cell)) = row.get_mut(idx) {
                *cell = cleaner.clean(cell, &mut stats);
            }
        }
        ctx.report_rows(done + 1, total);
    }

    let min = options.count("min_text_length");
    let max = options.count("max_text_length");
    let mut removed_by_length = 0;
    if min > 0 || max > 0 {
        let primary = columns[0];
        let keep: Vec<bool> = table
            .rows()
            .iter()
            .map(|row| {
                let len = row.get(primary).map_or(0, |v| v.display().chars().count());
                (min == 0 || len >= min) && (max == 0 || len <= max)
            })
            .collect();
        removed_by_length = table.retain_mask(&keep);
    }

    let avg_cleaned = if rows_before > 0 {
        stats.chars_cleaned as f64 / rows_before as f64
    } else {
        0.0
    };
    let cleaned_columns: Vec<String> = columns
        .iter()
        .map(|&idx| table.columns()[idx].clone())
        .collect();

    Ok(StageOutput::new(table)
        .with_meta("encoding_fixes", stats.encoding_fixes)
        .with_meta("html_stripped", stats.html_stripped)
        .with_meta("rows_removed_by_length", removed_by_length)
        .with_meta("chars_cleaned_per_row_avg", (avg_cleaned * 100.0).round() / 100.0)
        .with_meta("columns_cleaned", cleaned_columns)
        .with_warnings(warnings))
}
