//! Test data builders for creating dataset scenarios

use dataforge_core::export::{ExportFormat, export};
use dataforge_core::{Result, Table, Value};

const SUBJECTS: &[&str] = &[
    "The engineer", "A researcher", "Our team", "The committee", "My neighbour",
    "The library", "A student", "The council", "Every reviewer", "The pilot",
];

const VERBS: &[&str] = &[
    "reviewed", "published", "rejected", "translated", "summarised",
    "archived", "discussed", "measured", "repaired", "described",
];

const OBJECTS: &[&str] = &[
    "the quarterly report", "an old manuscript", "the bridge design",
    "a long survey", "the harvest data", "the museum catalogue",
    "a noisy recording", "the river samples", "an unusual contract",
    "the weather logs",
];

/// Deterministic, pairwise distinct English sentences
///
/// Sentences differ in at least one of subject, verb or object and carry
/// their index, so exact duplicates only appear where a test adds them.
pub fn sample_sentences(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let subject = SUBJECTS[i % SUBJECTS.len()];
            let verb = VERBS[(i / SUBJECTS.len()) % VERBS.len()];
            let object = OBJECTS[(i / (SUBJECTS.len() * VERBS.len())) % OBJECTS.len()];
            format!("{subject} {verb} {object} during session number {i}.")
        })
        .collect()
}

/// Builder for `{id, text}` datasets with controlled duplicates
///
/// # Examples
///
/// ```
/// use dataforge_test_utils::TestDataBuilder;
///
/// let table = TestDataBuilder::new()
///     .with_unique_rows(10)
///     .with_duplicates(2)
///     .build();
/// assert_eq!(table.row_count(), 12);
/// ```
pub struct TestDataBuilder {
    unique_rows: usize,
    duplicates: usize,
    extra_texts: Vec<String>,
    text_column: String,
}

impl TestDataBuilder {
    /// Create a new test data builder
    pub fn new() -> Self {
        Self {
            unique_rows: 0,
            duplicates: 0,
            extra_texts: Vec::new(),
            text_column: "text".to_string(),
        }
    }

    /// Number of distinct sentences
    pub fn with_unique_rows(mut self, count: usize) -> Self {
        self.unique_rows = count;
        self
    }

    /// Append exact copies of the first `count` sentences
    pub fn with_duplicates(mut self, count: usize) -> Self {
        self.duplicates = count;
        self
    }

    /// Append a specific text row
    pub fn with_text(mut self, text: &str) -> Self {
        self.extra_texts.push(text.to_string());
        self
    }

    /// Name of the text column
    pub fn with_text_column(mut self, name: &str) -> Self {
        self.text_column = name.to_string();
        self
    }

    /// Texts in row order
    pub fn texts(&self) -> Vec<String> {
        let unique = sample_sentences(self.unique_rows);
        let copies = unique
            .iter()
            .cycle()
            .take(if unique.is_empty() { 0 } else { self.duplicates })
            .cloned()
            .collect::<Vec<_>>();
        unique
            .into_iter()
            .chain(copies)
            .chain(self.extra_texts.iter().cloned())
            .collect()
    }

    /// Build the table; ids are assigned after duplicates so rows stay distinct by id
    pub fn build(&self) -> Table {
        let mut table = Table::new(["id".to_string(), self.text_column.clone()]);
        for (i, text) in self.texts().into_iter().enumerate() {
            table.push_row(vec![Value::Text(format!("t{i}")), Value::Text(text)]);
        }
        table
    }

    /// Build only the text column, so duplicate texts are duplicate rows
    pub fn build_text_only(&self) -> Table {
        let mut table = Table::new([self.text_column.clone()]);
        for text in self.texts() {
            table.push_row(vec![Value::Text(text)]);
        }
        table
    }

    /// Text-only table encoded as CSV bytes
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        export(&self.build_text_only(), ExportFormat::Csv)
    }

    /// Text-only table encoded as JSONL bytes
    pub fn to_jsonl(&self) -> Result<Vec<u8>> {
        export(&self.build_text_only(), ExportFormat::Jsonl)
    }
}

impl Default for TestDataBuilder {
    fn default() -> Self {
        Self::new()
    }
}
