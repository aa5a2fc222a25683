//! Quality scoring: a 0-10 score per row, from heuristics and/or a model

use super::{
    ConfigField, QualityModel, StageContext, StageDescriptor, StageKind, StageOptions, StageOutput,
    select_text_columns,
};
use crate::error::{StageError, ValidationError};
use crate::table::{Table, Value};
use std::collections::HashMap;

const METHODS: &[&str] = &["heuristic", "ai", "both"];
const ACTIONS: &[&str] = &["score_only", "filter", "flag"];

/// Characters of each row sent to a quality model
const MODEL_INPUT_CHARS: usize = 2000;

/// Weights of the length, vocabulary, repetition, alphabetic and capitalization signals
const WEIGHTS: [f64; 5] = [1.5, 2.0, 2.0, 1.0, 0.5];

const BUCKETS: [(&str, f64); 5] = [
    ("0-2", 2.0),
    ("2-4", 4.0),
    ("4-6", 6.0),
    ("6-8", 8.0),
    ("8-10", f64::INFINITY),
];

pub(super) fn descriptor() -> StageDescriptor {
    StageDescriptor {
        kind: StageKind::QualityScorer,
        description: "Score each row 0-10 for quality using heuristics and optional AI",
        schema,
        check,
        apply,
    }
}

fn schema() -> Vec<ConfigField> {
    vec![
        ConfigField::choice("method", METHODS, "heuristic", "Scoring method"),
        ConfigField::choice("action", ACTIONS, "score_only", "Only score, drop rows below threshold, or flag them"),
        ConfigField::number("threshold", 0.0, Some(0.0), Some(10.0), "Score below which rows are filtered or flagged"),
        ConfigField::text("score_column_name", "quality_score", "Name of the score column"),
        ConfigField::text("reason_column_name", "quality_reason", "Name of the reason column"),
        ConfigField::list_or_all("text_columns", "auto", "Columns whose text is scored"),
        ConfigField::integer("ai_batch_size", 20, Some(1), Some(1000), "Rows per quality model call"),
    ]
}

fn check(options: &StageOptions) -> Result<(), ValidationError> {
    let stage = StageKind::QualityScorer.id();
    for field in ["score_column_name", "reason_column_name"] {
        if options.text(field).trim().is_empty() {
            return Err(ValidationError::out_of_range(stage, field, "must not be empty"));
        }
    }
    if options.text("score_column_name") == options.text("reason_column_name") {
        return Err(ValidationError::conflict(
            stage,
            "score_column_name and reason_column_name must differ",
        ));
    }
    Ok(())
}

/// Score text 0-10 from five heuristic signals
///
/// Returns the score rounded to two decimals and a `; `-separated reason.
pub fn heuristic_score(text: &str) -> (f64, String) {
    if text.trim().is_empty() {
        return (0.0, "Empty text".to_string());
    }

    let mut reasons: Vec<String> = Vec::new();
    let mut scores = [0.0f64; 5];

    let length = text.chars().count();
    scores[0] = match length {
        0..10 => {
            reasons.push("Very short".into());
            1.0
        }
        10..50 => {
            reasons.push("Short".into());
            4.0
        }
        50..=5000 => 10.0,
        5001..=20000 => {
            reasons.push("Long".into());
            7.0
        }
        _ => {
            reasons.push("Very long".into());
            4.0
        }
    };

    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    scores[1] = if words.is_empty() {
        1.0
    } else {
        let unique = words.iter().collect::<std::collections::HashSet<_>>().len();
        let ratio = unique as f64 / words.len() as f64;
        if ratio < 0.3 {
            reasons.push("Low vocabulary diversity".into());
        }
        (ratio * 12.0).min(10.0)
    };

    let sentences: Vec<String> = crate::text::sentences(text)
        .into_iter()
        .map(str::to_lowercase)
        .collect();
    scores[2] = if sentences.len() > 1 {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for s in &sentences {
            *counts.entry(s.as_str()).or_default() += 1;
        }
        let max_repeat = counts.values().copied().max().unwrap_or(1);
        if max_repeat > 2 {
            reasons.push(format!("Repeated sentences ({max_repeat}x)"));
            (10.0 - (max_repeat as f64 - 1.0) * 2.0).max(1.0)
        } else {
            10.0
        }
    } else {
        7.0
    };

    let alpha = text.chars().filter(|c| c.is_alphabetic()).count();
    let alpha_ratio = alpha as f64 / length as f64;
    scores[3] = if alpha_ratio > 0.6 {
        10.0
    } else if alpha_ratio > 0.4 {
        7.0
    } else {
        reasons.push("High special char ratio".into());
        3.0
    };

    scores[4] = if alpha == 0 {
        5.0
    } else {
        let upper = text.chars().filter(|c| c.is_uppercase()).count();
        let upper_ratio = upper as f64 / alpha as f64;
        if (0.02..=0.15).contains(&upper_ratio) {
            10.0
        } else if upper_ratio > 0.5 {
            reasons.push("Excessive caps".into());
            3.0
        } else {
            7.0
        }
    };

    let weighted: f64 = scores.iter().zip(WEIGHTS).map(|(s, w)| s * w).sum();
    let total_weight: f64 = WEIGHTS.iter().sum();
    let score = (weighted / total_weight).clamp(0.0, 10.0);
    let reason = if reasons.is_empty() {
        "Good quality".to_string()
    } else {
        reasons.join("; ")
    };
    ((score * 100.0).round() / 100.0, reason)
}

/// Score rows with a model batch by batch, falling back to heuristics per failed batch
fn model_scores(
    model: &dyn QualityModel,
    texts: &[String],
    batch_size: usize,
    warnings: &mut Vec<String>,
    ctx: &StageContext,
) -> Vec<(f64, String)> {
    let mut scored = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let inputs: Vec<String> = batch
            .iter()
            .map(|t| t.chars().take(MODEL_INPUT_CHARS).collect())
            .collect();
        match model.score_batch(&inputs) {
            Ok(verdicts) if verdicts.len() == batch.len() => {
                let mut unusable = 0usize;
                for (verdict, text) in verdicts.into_iter().zip(batch) {
                    if verdict.score.is_finite() {
                        scored.push((verdict.score.clamp(0.0, 10.0), verdict.reason));
                    } else {
                        unusable += 1;
                        scored.push(fallback(text));
                    }
                }
                if unusable > 0 {
                    warnings.push(format!(
                        "{} returned {unusable} non-finite scores; using heuristic scores for those rows",
                        model.name()
                    ));
                }
            }
            Ok(verdicts) => {
                warnings.push(format!(
                    "{} returned {} scores for a batch of {}; using heuristic scores for that batch",
                    model.name(),
                    verdicts.len(),
                    batch.len()
                ));
                scored.extend(batch.iter().map(|t| fallback(t)));
            }
            Err(e) => {
                log::warn!("Quality model {} failed on a batch: {e}", model.name());
                warnings.push(format!("AI scoring failed for batch: {e}"));
                scored.extend(batch.iter().map(|t| fallback(t)));
            }
        }
        ctx.report_rows(scored.len(), texts.len());
    }
    scored
}

fn fallback(text: &str) -> (f64, String) {
    let (score, reason) = heuristic_score(text);
    (score, format!("(fallback) {reason}"))
}

fn apply(mut table: Table, options: &StageOptions, ctx: &StageContext) -> Result<StageOutput, StageError> {
    let method = options.text("method");
    let action = options.text("action");
    let threshold = options.number("threshold");
    let score_column = options.text("score_column_name");
    let reason_column = options.text("reason_column_name");
    let mut warnings = Vec::new();

    let columns = select_text_columns(&table, options.selection("text_columns"));
    let rows = table.row_count();

    let scored: Vec<(f64, String)> = if columns.is_empty() {
        warnings.push("No text columns found for quality scoring.".to_string());
        vec![(5.0, "No text columns".to_string()); rows]
    } else {
        let texts: Vec<String> = table
            .rows()
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .filter_map(|&idx| row.get(idx))
                    .filter(|v| !v.is_null())
                    .map(|v| v.display())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();

        let heuristic = || -> Vec<(f64, String)> {
            texts
                .iter()
                .enumerate()
                .map(|(done, t)| {
                    ctx.report_rows(done + 1, texts.len());
                    heuristic_score(t)
                })
                .collect()
        };

        match (method, ctx.quality()) {
            ("heuristic", _) => heuristic(),
            (_, None) => {
                warnings.push(format!(
                    "No quality model configured; method '{method}' fell back to heuristic scoring"
                ));
                heuristic()
            }
            ("ai", Some(model)) => {
                model_scores(model, &texts, options.count("ai_batch_size"), &mut warnings, ctx)
            }
            (_, Some(model)) => {
                let ai = model_scores(model, &texts, options.count("ai_batch_size"), &mut warnings, ctx);
                heuristic()
                    .into_iter()
                    .zip(ai)
                    .map(|((hs, hr), (as_, ar))| {
                        (((hs + as_) / 2.0 * 100.0).round() / 100.0, format!("H: {hr} | AI: {ar}"))
                    })
                    .collect()
            }
        }
    };

    let scores: Vec<f64> = scored.iter().map(|(s, _)| *s).collect();
    let mut distribution: Vec<(&str, usize)> = BUCKETS.iter().map(|(name, _)| (*name, 0)).collect();
    for &s in &scores {
        if let Some(slot) = BUCKETS.iter().position(|(_, upper)| s < *upper) {
            distribution[slot].1 += 1;
        }
    }
    let mean = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    let median = {
        let mut sorted = scores.clone();
        sorted.sort_by(f64::total_cmp);
        sorted.get(sorted.len() / 2).copied().unwrap_or(0.0)
    };

    let (score_values, reason_values): (Vec<Value>, Vec<Value>) = scored
        .into_iter()
        .map(|(s, r)| (Value::Float(s), Value::Text(r)))
        .unzip();
    table.set_column(score_column, score_values);
    table.set_column(reason_column, reason_values);

    let mut filtered = 0;
    if threshold > 0.0 {
        match action {
            "filter" => {
                let keep: Vec<bool> = scores.iter().map(|s| *s >= threshold).collect();
                filtered = table.retain_mask(&keep);
            }
            "flag" => {
                table.set_column(
                    "quality_flag",
                    scores.iter().map(|s| Value::Bool(*s < threshold)).collect(),
                );
            }
            _ => {}
        }
    } else if action != "score_only" {
        warnings.push(format!("action '{action}' has no effect with threshold 0"));
    }

    let distribution: serde_json::Map<String, serde_json::Value> = distribution
        .into_iter()
        .map(|(name, n)| (name.to_string(), n.into()))
        .collect();
    let method_used = match (method, ctx.quality()) {
        ("heuristic", _) | (_, None) => "heuristic".to_string(),
        (m, Some(model)) => format!("{m} ({})", model.name()),
    };
    Ok(StageOutput::new(table)
        .with_meta("score_distribution", distribution)
        .with_meta("mean_score", (mean * 100.0).round() / 100.0)
        .with_meta("median_score", (median * 100.0).round() / 100.0)
        .with_meta("rows_filtered", filtered)
        .with_meta("method_used", method_used)
        .with_warnings(warnings))
}
