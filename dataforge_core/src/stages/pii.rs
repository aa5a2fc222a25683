//! PII scrubbing with a regex entity catalog

use super::{
    ConfigField, StageContext, StageDescriptor, StageKind, StageOptions, StageOutput,
    select_text_columns,
};
use crate::error::{StageError, ValidationError};
use crate::table::{Table, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

const ACTIONS: &[&str] = &["redact", "remove_row", "flag"];

/// Placeholder value that redacts each match as `<ENTITY>`
const ENTITY_PLACEHOLDER: &str = "<ENTITY_TYPE>";

/// Entity catalog in matching order
///
/// With `redact`, each pattern runs on the output of the previous one.
static ENTITIES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("EMAIL", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        ("URL", r#"https?://[^\s<>"']+|www\.[^\s<>"']+"#),
        ("CREDIT_CARD", r"\b(?:\d{4}[-\s]?){3}\d{4}\b"),
        ("SSN", r"\b\d{3}-?\d{2}-?\d{4}\b"),
        ("PHONE", r"(?:\+?1[-.\s]?)?\(?[2-9]\d{2}\)?[-.\s]?\d{3}[-.\s]?\d{4}"),
        ("IP_ADDRESS", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
    ]
    .into_iter()
    .map(|(name, pattern)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("valid PII pattern");
        (name, re)
    })
    .collect()
});

/// Names of the entities the scrubber recognizes
pub fn entity_names() -> Vec<&'static str> {
    ENTITIES.iter().map(|(name, _)| *name).collect()
}

pub(super) fn descriptor() -> StageDescriptor {
    StageDescriptor {
        kind: StageKind::PiiScrubbing,
        description: "Detect and redact/remove/flag personally identifiable information",
        schema,
        check,
        apply,
    }
}

fn schema() -> Vec<ConfigField> {
    vec![
        ConfigField::choice("action", ACTIONS, "redact", "What to do with rows containing PII"),
        ConfigField::list_or_all(
            "entities",
            "ALL",
            "Entity types to detect: EMAIL, URL, CREDIT_CARD, SSN, PHONE, IP_ADDRESS",
        ),
        ConfigField::text(
            "redact_with",
            "[REDACTED]",
            "Replacement text; <ENTITY_TYPE> substitutes the entity name",
        ),
        ConfigField::list_or_all("columns", "all_text", "Columns to scan"),
    ]
}

fn check(options: &StageOptions) -> Result<(), ValidationError> {
    let Some(requested) = options.selection("entities") else {
        return Ok(());
    };
    let known = entity_names();
    for entity in requested {
        if entity != "ALL" && !known.contains(&entity.as_str()) {
            let mut allowed = known.clone();
            allowed.push("ALL");
            return Err(ValidationError::invalid_choice(
                StageKind::PiiScrubbing.id(),
                "entities",
                entity,
                &allowed,
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Redact,
    RemoveRow,
    Flag,
}

impl Action {
    fn parse(value: &str) -> Self {
        match value {
            "remove_row" => Self::RemoveRow,
            "flag" => Self::Flag,
            _ => Self::Redact,
        }
    }
}

fn active_entities(options: &StageOptions) -> Vec<&'static (&'static str, Regex)> {
    match options.selection("entities") {
        Some(requested) if !requested.iter().any(|e| e == "ALL") => ENTITIES
            .iter()
            .filter(|(name, _)| requested.iter().any(|r| r.as_str() == *name))
            .collect(),
        _ => ENTITIES.iter().collect(),
    }
}

fn apply(mut table: Table, options: &StageOptions, ctx: &StageContext) -> Result<StageOutput, StageError> {
    let action = Action::parse(options.text("action"));
    let redact_with = options.text("redact_with");
    let entities = active_entities(options);
    let mut warnings = Vec::new();

    let columns = select_text_columns(&table, options.selection("columns"));
    if columns.is_empty() {
        warnings.push("No text columns found for PII scanning.".to_string());
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total_instances = 0usize;
    let mut flags = Vec::with_capacity(table.row_count());
    let mut found = Vec::with_capacity(table.row_count());
    let total = table.row_count();

    for (done, row) in table.rows_mut().iter_mut().enumerate() {
        let mut row_entities: Vec<&str> = Vec::new();
        for &idx in &columns {
            let Some(Value::Text(cell)) = row.get_mut(idx) else {
                continue;
            };
            for &(name, ref re) in entities.iter().copied() {
                let hits = re.find_iter(cell).count();
                if hits == 0 {
                    continue;
                }
                *counts.entry(name).or_default() += hits;
                total_instances += hits;
                if !row_entities.contains(&name) {
                    row_entities.push(name);
                }
                if action == Action::Redact {
                    let replacement = if redact_with == ENTITY_PLACEHOLDER {
                        format!("<{name}>")
                    } else {
                        redact_with.to_string()
                    };
                    *cell = re.replace_all(cell, regex::NoExpand(&replacement)).into_owned();
                }
            }
        }
        flags.push(!row_entities.is_empty());
        found.push(row_entities.join(","));
        ctx.report_rows(done + 1, total);
    }

    let rows_with_pii = flags.iter().filter(|f| **f).count();
    match action {
        Action::Redact => {}
        Action::RemoveRow => {
            let keep: Vec<bool> = flags.iter().map(|f| !f).collect();
            table.retain_mask(&keep);
        }
        Action::Flag => {
            table.set_column("pii_detected", flags.into_iter().map(Value::Bool).collect());
            table.set_column("pii_entities", found.into_iter().map(Value::Text).collect());
        }
    }

    let scanned: Vec<String> = columns
        .iter()
        .filter_map(|&idx| table.columns().get(idx).cloned())
        .collect();
    let entities_found: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count.into()))
        .collect();

    Ok(StageOutput::new(table)
        .with_meta("rows_with_pii", rows_with_pii)
        .with_meta("total_pii_instances", total_instances)
        .with_meta("entities_found", entities_found)
        .with_meta("action_taken", options.text("action"))
        .with_meta("columns_scanned", scanned)
        .with_warnings(warnings))
}
