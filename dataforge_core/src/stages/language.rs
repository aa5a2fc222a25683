//! Language detection and language-based filtering
//!
//! Detection is a small built-in model: non-Latin scripts are recognized by
//! their Unicode blocks, Latin-script languages by stopword profiles.
//! Confidence combines how clearly the best language wins with how many of
//! the words it covers.

use super::{ConfigField, StageContext, StageDescriptor, StageKind, StageOptions, StageOutput};
use crate::error::{StageError, ValidationError};
use crate::table::{Table, Value};
use std::collections::{BTreeMap, HashMap};

const ACTIONS: &[&str] = &["tag_only", "filter_keep", "filter_remove"];

/// Texts shorter than this are not classified
pub const MIN_DETECTABLE_CHARS: usize = 20;

/// Code used for texts that could not be classified
pub const UNKNOWN: &str = "unknown";

const PROFILES: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "is", "are", "was", "were", "of", "to", "with", "that", "this", "it",
            "for", "you", "have", "has", "be", "not", "on", "by", "from", "they", "we", "which",
            "would", "there", "their", "what", "about", "been", "will", "can", "an", "or",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "del", "y", "por", "para", "una", "su", "al", "lo", "como",
            "pero", "sus", "ya", "este", "está", "son", "también", "fue", "muy", "hay", "esta",
            "cuando", "porque", "entre", "sobre", "todo", "hace", "es", "que", "se",
        ],
    ),
    (
        "fr",
        &[
            "le", "les", "des", "et", "est", "une", "dans", "pour", "pas", "sur", "au", "avec",
            "ce", "il", "elle", "sont", "qui", "mais", "nous", "vous", "ils", "leur", "aux",
            "été", "très", "sans", "cette", "être", "du", "je",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "mit", "sich", "auf", "für", "ein",
            "eine", "dem", "den", "auch", "wird", "bei", "sind", "noch", "wie", "oder", "aber",
            "nach", "wenn", "nur", "ich", "zu", "von", "im", "dass",
        ],
    ),
    (
        "it",
        &[
            "il", "gli", "della", "che", "è", "sono", "per", "non", "una", "nel", "anche", "come",
            "più", "alla", "dei", "delle", "questo", "ha", "ma", "essere", "degli", "sul",
            "molto", "tutto", "ci", "di", "lo", "si",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "da", "do", "das", "dos", "não", "uma", "um", "com", "para", "mais",
            "como", "mas", "foi", "ao", "ele", "ela", "seu", "sua", "são", "muito", "também",
            "já", "está", "isso", "em", "no", "na",
        ],
    ),
    (
        "nl",
        &[
            "het", "een", "en", "van", "ik", "niet", "dat", "zijn", "op", "te", "met", "voor",
            "maar", "ook", "als", "bij", "nog", "wordt", "wel", "naar", "dan", "heeft", "deze",
            "hij", "zij", "er", "geen", "kan",
        ],
    ),
];

/// Result of classifying one text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanguageGuess {
    /// ISO 639-1 code or [`UNKNOWN`]
    pub code: &'static str,
    /// 0.0-1.0
    pub confidence: f64,
}

impl LanguageGuess {
    const UNDETERMINED: LanguageGuess = LanguageGuess {
        code: UNKNOWN,
        confidence: 0.0,
    };

    pub fn is_known(&self) -> bool {
        self.code != UNKNOWN
    }
}

fn script_language(c: char) -> Option<&'static str> {
    match c as u32 {
        0x3040..=0x30FF => Some("ja"),
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => Some("zh"),
        0xAC00..=0xD7AF | 0x1100..=0x11FF => Some("ko"),
        0x0400..=0x04FF => Some("ru"),
        0x0600..=0x06FF => Some("ar"),
        _ => None,
    }
}

/// Classify the language of a text
pub fn detect_language(text: &str) -> LanguageGuess {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_DETECTABLE_CHARS {
        return LanguageGuess::UNDETERMINED;
    }

    let mut letters = 0usize;
    let mut scripts: HashMap<&'static str, usize> = HashMap::new();
    for c in trimmed.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if let Some(lang) = script_language(c) {
            *scripts.entry(lang).or_default() += 1;
        }
    }
    if letters == 0 {
        return LanguageGuess::UNDETERMINED;
    }

    // Kana marks Japanese even when most characters are Han
    let kana = scripts.get("ja").copied().unwrap_or(0);
    let han = scripts.get("zh").copied().unwrap_or(0);
    if kana > 0 && kana + han > letters / 2 {
        return LanguageGuess {
            code: "ja",
            confidence: (kana + han) as f64 / letters as f64,
        };
    }
    if let Some((&code, &count)) = scripts
        .iter()
        .filter(|(code, _)| **code != "ja")
        .max_by_key(|(code, count)| (**count, std::cmp::Reverse(**code)))
    {
        if count * 2 > letters {
            return LanguageGuess {
                code,
                confidence: count as f64 / letters as f64,
            };
        }
    }

    let lowered = trimmed.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return LanguageGuess::UNDETERMINED;
    }

    let hits: Vec<(&'static str, usize)> = PROFILES
        .iter()
        .map(|(code, stopwords)| {
            let count = words.iter().filter(|w| stopwords.contains(*w)).count();
            (*code, count)
        })
        .collect();
    let total_hits: usize = hits.iter().map(|(_, n)| n).sum();
    let Some(&(code, best)) = hits.iter().max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0))) else {
        return LanguageGuess::UNDETERMINED;
    };
    if best == 0 {
        return LanguageGuess::UNDETERMINED;
    }

    let share = best as f64 / total_hits as f64;
    let coverage = best as f64 / words.len() as f64;
    LanguageGuess {
        code,
        confidence: share * (coverage * 3.0).min(1.0),
    }
}

/// Most common confidently-detected language of a table's main text column
///
/// Looks at up to the first 200 rows.
pub fn dominant_language(table: &Table) -> Option<String> {
    let column = table.primary_text_column()?;
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for value in table.column_values(column).take(200) {
        if let Some(text) = value.as_text() {
            let guess = detect_language(text);
            if guess.is_known() && guess.confidence >= 0.5 {
                *counts.entry(guess.code).or_default() += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(code, _)| code.to_string())
}

pub(super) fn descriptor() -> StageDescriptor {
    StageDescriptor {
        kind: StageKind::LanguageFilter,
        description: "Detect language per row and filter/tag based on language",
        schema,
        check,
        apply,
    }
}

fn schema() -> Vec<ConfigField> {
    vec![
        ConfigField::choice("action", ACTIONS, "tag_only", "Tag rows, or keep/remove the listed languages"),
        ConfigField::list("languages", &["en"], "ISO 639-1 codes the filter applies to"),
        ConfigField::number(
            "min_confidence",
            0.8,
            Some(0.0),
            Some(1.0),
            "Detections below this are undetermined and never filtered",
        ),
        ConfigField::text("text_column", "auto", "Column to classify; auto picks the longest text column"),
        ConfigField::text("tag_column_name", "language", "Name of the added language column"),
    ]
}

fn check(options: &StageOptions) -> Result<(), ValidationError> {
    let stage = StageKind::LanguageFilter.id();
    if options.text("tag_column_name").trim().is_empty() {
        return Err(ValidationError::out_of_range(stage, "tag_column_name", "must not be empty"));
    }
    let languages = options.get("languages").and_then(|v| v.as_list()).unwrap_or_default();
    if options.text("action") != "tag_only" && languages.is_empty() {
        return Err(ValidationError::conflict(
            stage,
            format!("action '{}' needs at least one language", options.text("action")),
        ));
    }
    Ok(())
}

fn apply(mut table: Table, options: &StageOptions, ctx: &StageContext) -> Result<StageOutput, StageError> {
    let stage = ctx.stage();
    let action = options.text("action");
    let languages = options.get("languages").and_then(|v| v.as_list()).unwrap_or_default();
    let min_confidence = options.number("min_confidence");
    let tag_column = options.text("tag_column_name");

    let column = match options.text("text_column") {
        "auto" => match table.primary_text_column() {
            Some(idx) => idx,
            None => {
                return Ok(StageOutput::new(table)
                    .with_meta("language_distribution", serde_json::Map::new())
                    .with_meta("undetermined", 0)
                    .with_meta("rows_removed", 0)
                    .with_warnings(vec!["No text columns found for language detection.".to_string()]));
            }
        },
        name => table
            .column_index(name)
            .ok_or_else(|| StageError::column_not_found(stage, name))?,
    };
    let column_name = table.columns()[column].clone();

    let total = table.row_count();
    let guesses: Vec<LanguageGuess> = table
        .column_values(column)
        .enumerate()
        .map(|(done, value)| {
            ctx.report_rows(done + 1, total);
            match value {
                Value::Text(text) => detect_language(text),
                _ => LanguageGuess::UNDETERMINED,
            }
        })
        .collect();

    let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
    let mut undetermined = 0usize;
    let keep: Vec<bool> = guesses
        .iter()
        .map(|guess| {
            *distribution.entry(guess.code).or_default() += 1;
            if !guess.is_known() || guess.confidence < min_confidence {
                undetermined += 1;
                return true;
            }
            let listed = languages.iter().any(|l| l == guess.code);
            match action {
                "filter_keep" => listed,
                "filter_remove" => !listed,
                _ => true,
            }
        })
        .collect();

    table.set_column(tag_column, guesses.iter().map(|g| Value::from(g.code)).collect());
    table.set_column(
        &format!("{tag_column}_confidence"),
        guesses
            .iter()
            .map(|g| Value::Float((g.confidence * 1000.0).round() / 1000.0))
            .collect(),
    );
    let removed = table.retain_mask(&keep);

    let distribution: serde_json::Map<String, serde_json::Value> = distribution
        .into_iter()
        .map(|(code, n)| (code.to_string(), n.into()))
        .collect();
    Ok(StageOutput::new(table)
        .with_meta("language_distribution", distribution)
        .with_meta("undetermined", undetermined)
        .with_meta("rows_removed", removed)
        .with_meta("action", action)
        .with_meta("text_column_used", column_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::OptionValue;

    const ENGLISH: &str = "The quick brown fox jumps over the lazy dog and runs away from the farmer";
    const SPANISH: &str = "El perro come la comida y los niños juegan en el parque porque hace sol";
    const GERMAN: &str = "Der Hund ist nicht mit dem Ball auf der Wiese, und die Katze schläft";

    fn options(pairs: &[(&str, OptionValue)]) -> StageOptions {
        let supplied: BTreeMap<_, _> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        descriptor().resolve(&supplied).unwrap()
    }

    fn sample() -> Table {
        let mut table = Table::new(["id", "body"]);
        table.push_row(vec![Value::Int(1), ENGLISH.into()]);
        table.push_row(vec![Value::Int(2), SPANISH.into()]);
        table.push_row(vec![Value::Int(3), "too short".into()]);
        table.push_row(vec![Value::Int(4), GERMAN.into()]);
        table
    }

    fn run(table: Table, options: &StageOptions) -> Result<StageOutput, StageError> {
        apply(table, options, &StageContext::detached(StageKind::LanguageFilter))
    }

    #[test]
    fn test_detects_common_languages() {
        assert_eq!(detect_language(ENGLISH).code, "en");
        assert_eq!(detect_language(SPANISH).code, "es");
        assert_eq!(detect_language(GERMAN).code, "de");
        assert!(detect_language(ENGLISH).confidence >= 0.8);
    }

    #[test]
    fn test_detects_scripts() {
        assert_eq!(detect_language("Привет, как у тебя дела сегодня вечером?").code, "ru");
        assert_eq!(detect_language("これは日本語の文章です。とても良い天気ですね。").code, "ja");
    }

    #[test]
    fn test_short_text_is_unknown() {
        assert_eq!(detect_language("hello there"), LanguageGuess::UNDETERMINED);
    }

    #[test]
    fn test_tag_only_adds_columns() {
        let output = run(sample(), &options(&[])).unwrap();
        let table = &output.table;
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.columns(), ["id", "body", "language", "language_confidence"]);
        assert_eq!(table.cell(0, 2), Some(&Value::from("en")));
        assert_eq!(table.cell(2, 2), Some(&Value::from(UNKNOWN)));
        assert_eq!(output.metadata["text_column_used"], "body");
    }

    #[test]
    fn test_filter_keep_spares_undetermined_rows() {
        let output = run(
            sample(),
            &options(&[("action", "filter_keep".into()), ("languages", ["en"].into())]),
        )
        .unwrap();
        let ids: Vec<_> = output.table.column_values(0).cloned().collect();
        assert_eq!(ids, [Value::Int(1), Value::Int(3)]);
        assert_eq!(output.metadata["rows_removed"], 2);
    }

    #[test]
    fn test_filter_remove() {
        let output = run(
            sample(),
            &options(&[("action", "filter_remove".into()), ("languages", ["es", "de"].into())]),
        )
        .unwrap();
        assert_eq!(output.table.row_count(), 2);
    }

    #[test]
    fn test_low_confidence_rows_are_kept() {
        let output = run(
            sample(),
            &options(&[
                ("action", "filter_keep".into()),
                ("languages", ["fr"].into()),
                ("min_confidence", 1.0.into()),
            ]),
        )
        .unwrap();
        // only rows detected with full confidence can be filtered out
        let undetermined = output.metadata["undetermined"].as_u64().unwrap() as usize;
        assert_eq!(output.table.row_count(), undetermined);
    }

    #[test]
    fn test_missing_explicit_column_fails() {
        let err = run(sample(), &options(&[("text_column", "nope".into())])).unwrap_err();
        assert!(matches!(err, StageError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_filter_without_languages_rejected() {
        let supplied: BTreeMap<String, OptionValue> = [
            ("action".to_string(), OptionValue::from("filter_keep")),
            ("languages".to_string(), OptionValue::List(vec![])),
        ]
        .into_iter()
        .collect();
        assert!(descriptor().resolve(&supplied).is_err());
    }

    #[test]
    fn test_dominant_language() {
        let mut table = sample();
        table.push_row(vec![Value::Int(5), ENGLISH.to_uppercase().into()]);
        assert_eq!(dominant_language(&table).as_deref(), Some("en"));
    }
}
