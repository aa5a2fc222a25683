//! Property tests for stage transformations

use dataforge_core::stages::{StageContext, StageRegistry};
use dataforge_core::{StageConfig, StageKind, Table, Value};
use proptest::prelude::*;

fn table_of(texts: &[String]) -> Table {
    let mut table = Table::new(["text"]);
    for text in texts {
        table.push_row(vec![Value::Text(text.clone())]);
    }
    table
}

fn apply(config: StageConfig, table: Table) -> Table {
    let plan = StageRegistry::builtin().plan(&[config]).unwrap();
    let stage = &plan[0];
    let ctx = StageContext::detached(stage.kind);
    (stage.descriptor.apply)(table, &stage.options, &ctx)
        .unwrap()
        .table
}

proptest! {
    #[test]
    fn prop_dedup_is_idempotent(texts in prop::collection::vec("[a-c]{0,3}", 0..40)) {
        let once = apply(StageConfig::new(StageKind::Deduplication), table_of(&texts));
        let twice = apply(StageConfig::new(StageKind::Deduplication), once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_dedup_keeps_first_occurrences_in_order(texts in prop::collection::vec("[a-c]{1,2}", 0..40)) {
        let out = apply(StageConfig::new(StageKind::Deduplication), table_of(&texts));
        let mut seen = Vec::new();
        for text in &texts {
            if !seen.contains(text) {
                seen.push(text.clone());
            }
        }
        let kept: Vec<String> = out
            .rows()
            .iter()
            .map(|row| row[0].display().into_owned())
            .collect();
        prop_assert_eq!(kept, seen);
    }

    #[test]
    fn prop_noise_removal_without_length_bounds_keeps_every_row(
        texts in prop::collection::vec("[a-z <>/&;\t\n]{0,24}", 0..20)
    ) {
        let out = apply(StageConfig::new(StageKind::NoiseRemoval), table_of(&texts));
        prop_assert_eq!(out.row_count(), texts.len());
        prop_assert_eq!(out.columns(), &["text".to_string()]);
    }

    #[test]
    fn prop_pii_redaction_never_grows_row_count(texts in prop::collection::vec("[a-z0-9@. -]{0,30}", 0..20)) {
        let out = apply(StageConfig::new(StageKind::PiiScrubbing), table_of(&texts));
        prop_assert_eq!(out.row_count(), texts.len());
    }
}
