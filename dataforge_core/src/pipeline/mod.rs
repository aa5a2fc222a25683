//! Pipeline execution
//!
//! A pipeline is an ordered list of validated stages run one after another
//! against a private copy of a dataset's table. Stages never run in
//! parallel with each other; independent jobs run in parallel through the
//! job controller.

use crate::error::StageError;
use crate::stages::StageResult;
use crate::table::Table;
use serde::{Deserialize, Serialize};

mod executor;

pub use executor::PipelineExecutor;

/// Name of the JSON summary written next to every output artifact
pub const RESULT_ARTIFACT: &str = "result.json";

/// A downloadable output of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File name within the job's artifact directory, e.g. `output.jsonl`
    pub name: String,
    /// Store-specific location clients can fetch
    pub reference: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Summary of one pipeline run
///
/// Built by the executor; read-only once the job reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub total_rows_before: usize,
    pub total_rows_after: usize,
    pub total_rows_removed: usize,
    pub duration_seconds: f64,
    /// One entry per configured stage that was reached, in pipeline order
    pub stages: Vec<StageResult>,
    /// Stage warnings, each prefixed with the stage id
    pub warnings: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Columns of the transformed table
    #[serde(default)]
    pub output_columns: Vec<String>,
    /// Stage that aborted the pipeline, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
}

impl JobResult {
    /// Result before any stage ran
    pub(crate) fn start(rows: usize) -> Self {
        Self {
            total_rows_before: rows,
            total_rows_after: rows,
            total_rows_removed: 0,
            duration_seconds: 0.0,
            stages: Vec::new(),
            warnings: Vec::new(),
            artifacts: Vec::new(),
            output_columns: Vec::new(),
            failed_stage: None,
        }
    }

    /// Record a stage outcome and advance the running totals
    pub(crate) fn record(&mut self, result: StageResult) {
        self.warnings.extend(
            result
                .warnings
                .iter()
                .map(|w| format!("[{}] {w}", result.stage)),
        );
        if result.failed {
            self.failed_stage = Some(result.stage.clone());
        }
        self.total_rows_after = result.rows_after;
        self.total_rows_removed = self.total_rows_before.saturating_sub(self.total_rows_after);
        self.stages.push(result);
    }

    /// Number of stages that actually transformed the table
    pub fn executed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| !s.skipped && !s.failed)
            .count()
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    /// A stage raised; later stages never ran
    Failed {
        position: usize,
        stage: String,
        error: StageError,
    },
    /// Cancellation was observed before the stage at `position`
    Cancelled { position: usize },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct PipelineRun {
    pub outcome: RunOutcome,
    pub result: JobResult,
    /// The transformed table; present only when the run completed
    pub table: Option<Table>,
}
