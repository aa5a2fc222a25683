//! Stage library: the catalog of transformation stages
//!
//! The set of stages is fixed ([`StageKind`]). Each kind is registered once
//! in a [`StageRegistry`] as a [`StageDescriptor`]: its option schema, a
//! cross-field check, and a pure apply function from
//! `(table, options)` to a new table plus metadata.
//!
//! A pipeline request is a list of [`StageConfig`]s. [`StageRegistry::plan`]
//! validates the whole list up front and produces [`PlannedStage`]s, so a
//! bad request never reaches a worker.

use crate::error::{StageError, ValidationError};
use crate::progress::{ProgressProvider, ProgressUpdate};
use crate::table::Table;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

mod dedup;
mod language;
pub mod models;
mod noise;
mod options;
mod pii;
mod quality;

pub use language::{LanguageGuess, detect_language, dominant_language};
pub use models::{BagOfWordsModel, QualityModel, QualityVerdict, SimilarityModel};
pub use options::{ConfigField, FieldKind, OptionValue, StageOptions};
pub use quality::heuristic_score;

/// Free-form stage metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The fixed set of stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Deduplication,
    NoiseRemoval,
    PiiScrubbing,
    LanguageFilter,
    QualityScorer,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        Self::Deduplication,
        Self::NoiseRemoval,
        Self::PiiScrubbing,
        Self::LanguageFilter,
        Self::QualityScorer,
    ];

    /// Identifier used in pipeline requests
    pub fn id(&self) -> &'static str {
        match self {
            Self::Deduplication => "deduplication",
            Self::NoiseRemoval => "noise_removal",
            Self::PiiScrubbing => "pii_scrubbing",
            Self::LanguageFilter => "language_filter",
            Self::QualityScorer => "quality_scorer",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for StageKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == s)
            .ok_or_else(|| ValidationError::unknown_stage(s))
    }
}

fn enabled_by_default() -> bool {
    true
}

/// One entry of a pipeline request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub stage: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: BTreeMap<String, OptionValue>,
}

impl StageConfig {
    pub fn new(kind: StageKind) -> Self {
        Self {
            stage: kind.id().to_string(),
            enabled: true,
            config: BTreeMap::new(),
        }
    }

    /// Set an option
    pub fn with_option(mut self, name: &str, value: impl Into<OptionValue>) -> Self {
        self.config.insert(name.to_string(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Before/after record of one configured stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub position: usize,
    pub skipped: bool,
    #[serde(default)]
    pub failed: bool,
    pub rows_before: usize,
    pub rows_after: usize,
    pub rows_removed: usize,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl StageResult {
    /// Result of a stage that finished normally
    pub fn completed(
        stage: &str,
        position: usize,
        rows_before: usize,
        output: &StageOutput,
        duration_ms: u64,
    ) -> Self {
        let rows_after = output.table.row_count();
        Self {
            stage: stage.to_string(),
            position,
            skipped: false,
            failed: false,
            rows_before,
            rows_after,
            rows_removed: rows_before.saturating_sub(rows_after),
            metadata: output.metadata.clone(),
            warnings: output.warnings.clone(),
            duration_ms,
        }
    }

    /// Record for a disabled stage
    pub fn skipped(stage: &str, position: usize, rows: usize) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("reason".into(), "disabled".into());
        Self {
            stage: stage.to_string(),
            position,
            skipped: true,
            failed: false,
            rows_before: rows,
            rows_after: rows,
            rows_removed: 0,
            metadata,
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Record for a stage that raised; the working table is left unchanged
    pub fn failed(stage: &str, position: usize, rows: usize, error: &StageError, duration_ms: u64) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("error".into(), error.to_string().into());
        Self {
            stage: stage.to_string(),
            position,
            skipped: false,
            failed: true,
            rows_before: rows,
            rows_after: rows,
            rows_removed: 0,
            metadata,
            warnings: Vec::new(),
            duration_ms,
        }
    }

    /// One-line summary, e.g. `50 rows removed (1000 -> 950)`
    pub fn summary(&self) -> String {
        if self.skipped {
            return format!("skipped ({} rows)", self.rows_before);
        }
        if self.failed {
            return format!("failed ({} rows)", self.rows_before);
        }
        format!(
            "{} rows removed ({} -> {})",
            self.rows_removed, self.rows_before, self.rows_after
        )
    }
}

/// What a stage's apply function returns
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub table: Table,
    pub metadata: Metadata,
    pub warnings: Vec<String>,
}

impl StageOutput {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            metadata: Metadata::new(),
            warnings: Vec::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Everything a stage may use besides its table and options
#[derive(Clone)]
pub struct StageContext {
    stage: &'static str,
    position: usize,
    total: usize,
    progress: Arc<dyn ProgressProvider>,
    cancel: CancellationToken,
    similarity: Arc<dyn SimilarityModel>,
    quality: Option<Arc<dyn QualityModel>>,
}

impl StageContext {
    pub fn new(
        kind: StageKind,
        position: usize,
        total: usize,
        progress: Arc<dyn ProgressProvider>,
    ) -> Self {
        Self {
            stage: kind.id(),
            position,
            total,
            progress,
            cancel: CancellationToken::new(),
            similarity: Arc::new(BagOfWordsModel::default()),
            quality: None,
        }
    }

    /// Context with no progress sink, for running a stage on its own
    pub fn detached(kind: StageKind) -> Self {
        Self::new(kind, 0, 1, Arc::new(crate::progress::NullProvider))
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_similarity_model(mut self, model: Arc<dyn SimilarityModel>) -> Self {
        self.similarity = model;
        self
    }

    pub fn with_quality_model(mut self, model: Option<Arc<dyn QualityModel>>) -> Self {
        self.quality = model;
        self
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn similarity(&self) -> &dyn SimilarityModel {
        self.similarity.as_ref()
    }

    pub fn quality(&self) -> Option<&dyn QualityModel> {
        self.quality.as_deref()
    }

    /// True once the owning job was asked to stop or the stage timed out
    ///
    /// Stages are not required to check this; the executor checks between stages.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report row-level sub-progress, throttled to about 20 updates per stage
    ///
    /// Dropped once the stage was cancelled or abandoned after a timeout.
    pub fn report_rows(&self, done: usize, total: usize) {
        if total == 0 || self.is_cancelled() {
            return;
        }
        let step = (total / 20).max(1);
        if done % step != 0 && done != total {
            return;
        }
        self.progress.report(ProgressUpdate::StageProgress {
            position: self.position,
            total: self.total,
            stage: self.stage.to_string(),
            fraction: done as f64 / total as f64,
        });
    }
}

/// Apply function of a stage
pub type ApplyFn = fn(Table, &StageOptions, &StageContext) -> Result<StageOutput, StageError>;

/// Cross-field option check run after per-field validation
pub type CheckFn = fn(&StageOptions) -> Result<(), ValidationError>;

/// Registration record of one stage
#[derive(Clone, Copy)]
pub struct StageDescriptor {
    pub kind: StageKind,
    pub description: &'static str,
    pub schema: fn() -> Vec<ConfigField>,
    pub check: CheckFn,
    pub apply: ApplyFn,
}

impl StageDescriptor {
    /// Replace the apply function, keeping schema and checks
    pub fn with_apply(mut self, apply: ApplyFn) -> Self {
        self.apply = apply;
        self
    }

    /// Validate a raw option map for this stage
    pub fn resolve(&self, supplied: &BTreeMap<String, OptionValue>) -> Result<StageOptions, ValidationError> {
        let options = StageOptions::resolve(self.kind.id(), &(self.schema)(), supplied)?;
        (self.check)(&options)?;
        Ok(options)
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .finish()
    }
}

/// Public description of a stage and its options
#[derive(Debug, Clone, Serialize)]
pub struct StageSchema {
    pub id: &'static str,
    pub description: &'static str,
    pub fields: Vec<ConfigField>,
}

/// A validated pipeline entry ready to execute
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub position: usize,
    pub kind: StageKind,
    pub enabled: bool,
    pub options: StageOptions,
    pub descriptor: StageDescriptor,
}

/// Registry mapping each stage kind to its descriptor
pub struct StageRegistry {
    stages: RwLock<HashMap<StageKind, StageDescriptor>>,
}

impl StageRegistry {
    fn empty() -> Self {
        Self {
            stages: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding the built-in stages
    pub fn builtin() -> Self {
        let registry = Self::empty();
        registry.register(dedup::descriptor());
        registry.register(noise::descriptor());
        registry.register(pii::descriptor());
        registry.register(language::descriptor());
        registry.register(quality::descriptor());
        registry
    }

    /// Get the global registry instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceCell<StageRegistry> = OnceCell::new();
        INSTANCE.get_or_init(Self::builtin)
    }

    /// Register a stage, replacing any previous descriptor of the same kind
    pub fn register(&self, descriptor: StageDescriptor) {
        let mut stages = self.stages.write().unwrap_or_else(|p| p.into_inner());
        stages.insert(descriptor.kind, descriptor);
    }

    /// Get a stage by kind
    pub fn get(&self, kind: StageKind) -> Option<StageDescriptor> {
        let stages = self.stages.read().unwrap_or_else(|p| p.into_inner());
        stages.get(&kind).copied()
    }

    /// Schemas of all registered stages in catalog order
    pub fn describe(&self) -> Vec<StageSchema> {
        StageKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind))
            .map(|d| StageSchema {
                id: d.kind.id(),
                description: d.description,
                fields: (d.schema)(),
            })
            .collect()
    }

    /// Validate a pipeline request
    ///
    /// Disabled entries are validated too, so toggling `enabled` never turns
    /// a valid request into an invalid one.
    pub fn plan(&self, configs: &[StageConfig]) -> Result<Vec<PlannedStage>, ValidationError> {
        configs
            .iter()
            .enumerate()
            .map(|(position, config)| {
                let kind: StageKind = config.stage.parse()?;
                let descriptor = self
                    .get(kind)
                    .ok_or_else(|| ValidationError::unknown_stage(&config.stage))?;
                let options = descriptor.resolve(&config.config)?;
                Ok(PlannedStage {
                    position,
                    kind,
                    enabled: config.enabled,
                    options,
                    descriptor,
                })
            })
            .collect()
    }
}

/// Resolve the columns a stage works on
///
/// `None` selects every text column. Names that do not exist are ignored.
pub(crate) fn select_text_columns(table: &Table, selection: Option<&[String]>) -> Vec<usize> {
    match selection {
        None => table.text_columns(),
        Some(names) => names
            .iter()
            .filter_map(|name| table.column_index(name))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ids_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.id().parse::<StageKind>().unwrap(), kind);
        }
        assert!(matches!(
            "nonexistent_stage".parse::<StageKind>(),
            Err(ValidationError::UnknownStage { .. })
        ));
    }

    #[test]
    fn test_builtin_registry_describes_all_stages() {
        let schemas = StageRegistry::global().describe();
        let ids: Vec<_> = schemas.iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            ["deduplication", "noise_removal", "pii_scrubbing", "language_filter", "quality_scorer"]
        );
        assert!(schemas.iter().all(|s| !s.fields.is_empty()));
    }

    #[test]
    fn test_plan_rejects_unknown_stage() {
        let configs = vec![
            StageConfig::new(StageKind::Deduplication),
            StageConfig {
                stage: "nonexistent_stage".into(),
                enabled: true,
                config: BTreeMap::new(),
            },
        ];
        let err = StageRegistry::global().plan(&configs).unwrap_err();
        assert_eq!(err.stage(), Some("nonexistent_stage"));
    }

    #[test]
    fn test_plan_validates_disabled_stage_options() {
        let configs = vec![
            StageConfig::new(StageKind::Deduplication)
                .with_option("keep", "middle")
                .with_enabled(false),
        ];
        let err = StageRegistry::global().plan(&configs).unwrap_err();
        assert_eq!(err.field(), Some("keep"));
    }

    #[test]
    fn test_plan_keeps_positions() {
        let configs = vec![
            StageConfig::new(StageKind::NoiseRemoval),
            StageConfig::new(StageKind::Deduplication).with_enabled(false),
        ];
        let plan = StageRegistry::global().plan(&configs).unwrap();
        assert_eq!(plan[0].position, 0);
        assert_eq!(plan[1].kind, StageKind::Deduplication);
        assert!(!plan[1].enabled);
    }

    #[test]
    fn test_stage_config_deserializes_with_defaults() {
        let config: StageConfig = serde_json::from_str(r#"{"stage": "deduplication"}"#).unwrap();
        assert!(config.enabled);
        assert!(config.config.is_empty());
    }

    #[test]
    fn test_register_overrides_apply() {
        fn failing(_: Table, _: &StageOptions, ctx: &StageContext) -> Result<StageOutput, StageError> {
            Err(StageError::failed(ctx.stage(), "boom"))
        }

        let registry = StageRegistry::builtin();
        let descriptor = registry.get(StageKind::QualityScorer).unwrap().with_apply(failing);
        registry.register(descriptor);

        let d = registry.get(StageKind::QualityScorer).unwrap();
        let ctx = StageContext::detached(StageKind::QualityScorer);
        let options = d.resolve(&BTreeMap::new()).unwrap();
        assert!((d.apply)(Table::new(["a"]), &options, &ctx).is_err());
    }

    #[test]
    fn test_skipped_result_preserves_counts() {
        let result = StageResult::skipped("deduplication", 2, 40);
        assert!(result.skipped);
        assert_eq!(result.rows_before, 40);
        assert_eq!(result.rows_after, 40);
        assert_eq!(result.rows_removed, 0);
    }
}
